//! Instruction set of the target stack machine
//!
//! Instructions are a closed set of variants; `Display` produces the exact
//! wire mnemonics, one instruction per line in the final program text.
//! Variable addresses render as `[index:depth]`, indexed reads prefix the
//! address with `+`, and relative jump operands carry an explicit sign
//! after `#PC`.

use std::fmt;

pub type InstrList = Vec<Instr>;

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `push <n>` — also used for booleans (0/1) and colour words.
    PushInt(i64),
    /// `push <f>`
    PushFloat(f64),
    /// `push .<name>` — function label as a value, consumed by `call`.
    PushFunc(String),
    /// `push #PC<+|-><n>` — instruction offset relative to this push.
    PushRelative(i64),
    /// `push [<index>:<depth>]` — read one scalar frame slot.
    PushVar { index: usize, frame: usize },
    /// `pusha [<index>:<depth>]` — read a run of slots, reversed.
    PushArray { index: usize, frame: usize },
    /// `push +[<index>:<depth>]` — read one slot at a popped offset.
    PushIndexed { index: usize, frame: usize },
    /// `.<name>` — section marker opening a function.
    Label(String),
    Halt,
    OpenFrame,
    CloseFrame,
    Store,
    StoreArray,
    Return,
    ReturnArray,
    Drop,
    DupArray,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Not,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Jump,
    CondJump,
    Call,
    Print,
    PrintArray,
    RandInt,
    Delay,
    Width,
    Height,
    Read,
    Write,
    WriteBox,
    Clear,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::PushInt(value) => write!(f, "push {}", value),
            Instr::PushFloat(value) => write!(f, "push {}", value),
            Instr::PushFunc(name) => write!(f, "push .{}", name),
            Instr::PushRelative(offset) => {
                if *offset >= 0 {
                    write!(f, "push #PC+{}", offset)
                } else {
                    write!(f, "push #PC{}", offset)
                }
            }
            Instr::PushVar { index, frame } => write!(f, "push [{}:{}]", index, frame),
            Instr::PushArray { index, frame } => write!(f, "pusha [{}:{}]", index, frame),
            Instr::PushIndexed { index, frame } => write!(f, "push +[{}:{}]", index, frame),
            Instr::Label(name) => write!(f, ".{}", name),
            Instr::Halt => write!(f, "halt"),
            Instr::OpenFrame => write!(f, "oframe"),
            Instr::CloseFrame => write!(f, "cframe"),
            Instr::Store => write!(f, "st"),
            Instr::StoreArray => write!(f, "sta"),
            Instr::Return => write!(f, "ret"),
            Instr::ReturnArray => write!(f, "reta"),
            Instr::Drop => write!(f, "drop"),
            Instr::DupArray => write!(f, "dupa"),
            Instr::Add => write!(f, "add"),
            Instr::Sub => write!(f, "sub"),
            Instr::Mul => write!(f, "mul"),
            Instr::Div => write!(f, "div"),
            Instr::Mod => write!(f, "mod"),
            Instr::And => write!(f, "and"),
            Instr::Or => write!(f, "or"),
            Instr::Not => write!(f, "not"),
            Instr::Gt => write!(f, "gt"),
            Instr::Ge => write!(f, "ge"),
            Instr::Lt => write!(f, "lt"),
            Instr::Le => write!(f, "le"),
            Instr::Eq => write!(f, "eq"),
            Instr::Jump => write!(f, "jmp"),
            Instr::CondJump => write!(f, "cjmp"),
            Instr::Call => write!(f, "call"),
            Instr::Print => write!(f, "print"),
            Instr::PrintArray => write!(f, "printa"),
            Instr::RandInt => write!(f, "irnd"),
            Instr::Delay => write!(f, "delay"),
            Instr::Width => write!(f, "width"),
            Instr::Height => write!(f, "height"),
            Instr::Read => write!(f, "read"),
            Instr::Write => write!(f, "write"),
            Instr::WriteBox => write!(f, "writebox"),
            Instr::Clear => write!(f, "clear"),
        }
    }
}

/// Render one instruction list as newline-joined text with no trailing
/// newline.
pub fn render(list: &[Instr]) -> String {
    list.iter()
        .map(|instr| instr.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_renderings() {
        assert_eq!(Instr::PushInt(42).to_string(), "push 42");
        assert_eq!(Instr::PushFloat(1.5).to_string(), "push 1.5");
        assert_eq!(Instr::PushFloat(2.0).to_string(), "push 2");
        assert_eq!(Instr::PushFunc("main".into()).to_string(), "push .main");
        assert_eq!(Instr::PushRelative(3).to_string(), "push #PC+3");
        assert_eq!(Instr::PushRelative(0).to_string(), "push #PC+0");
        assert_eq!(Instr::PushRelative(-7).to_string(), "push #PC-7");
        assert_eq!(Instr::PushVar { index: 2, frame: 1 }.to_string(), "push [2:1]");
        assert_eq!(
            Instr::PushArray { index: 0, frame: 0 }.to_string(),
            "pusha [0:0]"
        );
        assert_eq!(
            Instr::PushIndexed { index: 4, frame: 2 }.to_string(),
            "push +[4:2]"
        );
    }

    #[test]
    fn test_section_and_control_renderings() {
        assert_eq!(Instr::Label("abs".into()).to_string(), ".abs");
        assert_eq!(Instr::OpenFrame.to_string(), "oframe");
        assert_eq!(Instr::CloseFrame.to_string(), "cframe");
        assert_eq!(Instr::CondJump.to_string(), "cjmp");
        assert_eq!(Instr::ReturnArray.to_string(), "reta");
        assert_eq!(Instr::DupArray.to_string(), "dupa");
        assert_eq!(Instr::RandInt.to_string(), "irnd");
        assert_eq!(Instr::WriteBox.to_string(), "writebox");
    }

    #[test]
    fn test_render_joins_without_trailing_newline() {
        let text = render(&[Instr::Label("main".into()), Instr::Halt]);
        assert_eq!(text, ".main\nhalt");
    }
}
