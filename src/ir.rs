// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

pub use crate::locals::{Local, LocalId, LocalKind, LocalUse, UseKind};

use std::fmt;
use std::slice;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TypeKind {
    Unknown,
    Void,
    Label,
    Bool,
    Int(u8),
    Float,
    Ptr,
}

/// The semantic type of a value
///
/// `width` is the number of SIMD elements, 1 for scalars and up to 16.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DataType {
    pub kind: TypeKind,
    pub width: u8,
}

impl DataType {
    pub const UNKNOWN: DataType = DataType::scalar(TypeKind::Unknown);
    pub const VOID: DataType = DataType::scalar(TypeKind::Void);
    pub const LABEL: DataType = DataType::scalar(TypeKind::Label);
    pub const BOOL: DataType = DataType::scalar(TypeKind::Bool);
    pub const INT8: DataType = DataType::scalar(TypeKind::Int(8));
    pub const INT16: DataType = DataType::scalar(TypeKind::Int(16));
    pub const INT32: DataType = DataType::scalar(TypeKind::Int(32));
    pub const FLOAT: DataType = DataType::scalar(TypeKind::Float);
    pub const PTR: DataType = DataType::scalar(TypeKind::Ptr);

    pub const fn scalar(kind: TypeKind) -> DataType {
        DataType { kind, width: 1 }
    }

    pub const fn vector(self, width: u8) -> DataType {
        assert!(width > 0 && width <= 16);
        DataType {
            kind: self.kind,
            width,
        }
    }

    pub fn element_type(self) -> DataType {
        DataType::scalar(self.kind)
    }

    pub fn is_vector(&self) -> bool {
        self.width > 1
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elem = match self.kind {
            TypeKind::Unknown => "?".to_string(),
            TypeKind::Void => "void".to_string(),
            TypeKind::Label => "label".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int(bits) => format!("i{bits}"),
            TypeKind::Float => "f32".to_string(),
            TypeKind::Ptr => "ptr".to_string(),
        };
        if self.is_vector() {
            write!(f, "<{} x {}>", self.width, elem)
        } else {
            write!(f, "{}", elem)
        }
    }
}

/// A fixed hardware register or I/O port
///
/// Several of these are not storage at all but ports into fixed-function
/// units.  Writing or reading them has side effects which depend on the order
/// of the accesses.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Register {
    /// Accumulators r0 to r3 and r5.  r4 is [`Register::SfuOut`].
    Acc(u8),
    FileA(u8),
    FileB(u8),
    Nop,
    ElemNum,
    QpuNum,
    SfuRecip,
    SfuRecipSqrt,
    SfuExp2,
    SfuLog2,
    /// Accumulator r4, receives SFU and TMU results
    SfuOut,
    TmuAddress,
    VpmIo,
    VpmInBusy,
    VpmInAddr,
    VpmOutBusy,
    VpmOutAddr,
    /// Reading acquires the mutex, writing releases it
    Mutex,
}

impl Register {
    /// Every port whose value is only valid after the SFU/TMU delay
    pub const SFU_TMU_GROUP: [Register; 6] = [
        Register::SfuExp2,
        Register::SfuLog2,
        Register::SfuOut,
        Register::SfuRecip,
        Register::SfuRecipSqrt,
        Register::TmuAddress,
    ];

    /// Folds the two spellings of accumulator r4 into [`Register::SfuOut`]
    pub fn canonical(self) -> Register {
        match self {
            Register::Acc(4) => Register::SfuOut,
            reg => reg,
        }
    }

    pub fn is_accumulator(&self) -> bool {
        matches!(self, Register::Acc(_) | Register::SfuOut)
    }

    pub fn is_sfu_or_tmu(&self) -> bool {
        Register::SFU_TMU_GROUP.contains(&self.canonical())
    }

    pub fn has_side_effects_on_read(&self) -> bool {
        matches!(
            self,
            Register::VpmIo
                | Register::VpmInBusy
                | Register::VpmOutBusy
                | Register::Mutex
        )
    }

    pub fn has_side_effects_on_write(&self) -> bool {
        match self {
            Register::SfuRecip
            | Register::SfuRecipSqrt
            | Register::SfuExp2
            | Register::SfuLog2
            | Register::TmuAddress
            | Register::VpmIo
            | Register::VpmInAddr
            | Register::VpmOutAddr
            | Register::Mutex => true,
            _ => false,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Acc(n) => write!(f, "r{n}"),
            Register::FileA(n) => write!(f, "ra{n}"),
            Register::FileB(n) => write!(f, "rb{n}"),
            Register::Nop => write!(f, "-"),
            Register::ElemNum => write!(f, "elem_num"),
            Register::QpuNum => write!(f, "qpu_num"),
            Register::SfuRecip => write!(f, "sfu_recip"),
            Register::SfuRecipSqrt => write!(f, "sfu_recipsqrt"),
            Register::SfuExp2 => write!(f, "sfu_exp2"),
            Register::SfuLog2 => write!(f, "sfu_log2"),
            Register::SfuOut => write!(f, "r4"),
            Register::TmuAddress => write!(f, "tmu0s"),
            Register::VpmIo => write!(f, "vpm"),
            Register::VpmInBusy => write!(f, "vpr_busy"),
            Register::VpmInAddr => write!(f, "vpr_addr"),
            Register::VpmOutBusy => write!(f, "vpw_busy"),
            Register::VpmOutAddr => write!(f, "vpw_addr"),
            Register::Mutex => write!(f, "mutex"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Immediate {
    Int(i32),
    /// Raw bits of an `f32`
    Float(u32),
}

impl Immediate {
    pub fn float(f: f32) -> Immediate {
        Immediate::Float(f.to_bits())
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int(i) => write!(f, "{i}"),
            Immediate::Float(bits) => write!(f, "{}f", f32::from_bits(*bits)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValueKind {
    /// A whole local or, with `elem`, a single element of it
    Local { local: LocalId, elem: Option<u8> },
    Reg(Register),
    Imm(Immediate),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Value {
    pub kind: ValueKind,
    pub ty: DataType,
}

impl Value {
    pub fn local(local: LocalId, ty: DataType) -> Value {
        Value {
            kind: ValueKind::Local { local, elem: None },
            ty,
        }
    }

    pub fn local_elem(local: LocalId, elem: u8, ty: DataType) -> Value {
        Value {
            kind: ValueKind::Local {
                local,
                elem: Some(elem),
            },
            ty: ty.element_type(),
        }
    }

    pub fn reg(reg: Register, ty: DataType) -> Value {
        Value {
            kind: ValueKind::Reg(reg),
            ty,
        }
    }

    pub fn int(i: i32) -> Value {
        Value {
            kind: ValueKind::Imm(Immediate::Int(i)),
            ty: DataType::INT32,
        }
    }

    pub fn float(f: f32) -> Value {
        Value {
            kind: ValueKind::Imm(Immediate::float(f)),
            ty: DataType::FLOAT,
        }
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self.kind {
            ValueKind::Local { local, .. } => Some(local),
            _ => None,
        }
    }

    pub fn as_reg(&self) -> Option<Register> {
        match self.kind {
            ValueKind::Reg(reg) => Some(reg),
            _ => None,
        }
    }

    pub fn has_local(&self, local: LocalId) -> bool {
        self.as_local() == Some(local)
    }

    pub fn has_reg(&self, reg: Register) -> bool {
        self.as_reg().map(Register::canonical) == Some(reg.canonical())
    }

    pub fn is_imm(&self) -> bool {
        matches!(self.kind, ValueKind::Imm(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValueKind::Local { local, elem: None } => write!(f, "{local}"),
            ValueKind::Local {
                local,
                elem: Some(e),
            } => write!(f, "{local}[{e}]"),
            ValueKind::Reg(reg) => write!(f, "{reg}"),
            ValueKind::Imm(imm) => write!(f, "{imm}"),
        }
    }
}

/// Per-element execution condition, evaluated against the ALU flags
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CondCode {
    Never,
    Always,
    ZeroSet,
    ZeroClear,
    NegativeSet,
    NegativeClear,
    CarrySet,
    CarryClear,
}

impl fmt::Display for CondCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CondCode::Never => write!(f, "never"),
            CondCode::Always => write!(f, "always"),
            CondCode::ZeroSet => write!(f, "ifz"),
            CondCode::ZeroClear => write!(f, "ifzc"),
            CondCode::NegativeSet => write!(f, "ifn"),
            CondCode::NegativeClear => write!(f, "ifnc"),
            CondCode::CarrySet => write!(f, "ifc"),
            CondCode::CarryClear => write!(f, "ifcc"),
        }
    }
}

/// Signal sent to the 3D pipeline along with an instruction
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Signal {
    None,
    SoftBreak,
    ThreadSwitch,
    ProgramEnd,
    WaitForScore,
    ScoreUnlock,
    LastThreadSwitch,
    LoadTmu0,
    LoadTmu1,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::None => write!(f, "none"),
            Signal::SoftBreak => write!(f, "bkpt"),
            Signal::ThreadSwitch => write!(f, "thrsw"),
            Signal::ProgramEnd => write!(f, "thrend"),
            Signal::WaitForScore => write!(f, "sbwait"),
            Signal::ScoreUnlock => write!(f, "sbdone"),
            Signal::LastThreadSwitch => write!(f, "lthrsw"),
            Signal::LoadTmu0 => write!(f, "ldtmu0"),
            Signal::LoadTmu1 => write!(f, "ldtmu1"),
        }
    }
}

/// Result pack mode.  Packed results have to go through register file A.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Pack(pub u8);

impl Pack {
    pub const NOP: Pack = Pack(0);
    pub const INT_TO_SHORT_TRUNCATE: Pack = Pack(1);
    pub const INT_TO_CHAR_TRUNCATE: Pack = Pack(4);
    pub const SATURATE: Pack = Pack(8);

    pub fn is_nop(&self) -> bool {
        *self == Pack::NOP
    }
}

impl fmt::Display for Pack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 16] = [
            "", "16a", "16b", "8888", "8a", "8b", "8c", "8d", "32s", "16as",
            "16bs", "8888s", "8as", "8bs", "8cs", "8ds",
        ];
        match NAMES.get(usize::from(self.0)) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "pack{}", self.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Unpack(pub u8);

impl Unpack {
    pub const NOP: Unpack = Unpack(0);

    pub fn is_nop(&self) -> bool {
        *self == Unpack::NOP
    }
}

impl fmt::Display for Unpack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 8] =
            ["", "16a", "16b", "8888", "8a", "8b", "8c", "8d"];
        match NAMES.get(usize::from(self.0)) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "unpack{}", self.0),
        }
    }
}

/// Why a `nop` exists
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DelayType {
    /// A just-written value needs one more cycle before it can be read back
    WaitRegister,
    WaitSfu,
    WaitTmu,
    BranchDelay,
    ThreadEnd,
}

impl fmt::Display for DelayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayType::WaitRegister => write!(f, "wait_reg"),
            DelayType::WaitSfu => write!(f, "wait_sfu"),
            DelayType::WaitTmu => write!(f, "wait_tmu"),
            DelayType::BranchDelay => write!(f, "branch_delay"),
            DelayType::ThreadEnd => write!(f, "thread_end"),
        }
    }
}

/// Opcodes of the add and the mul ALU
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AluOp {
    FAdd,
    FSub,
    FMin,
    FMax,
    FMinAbs,
    FMaxAbs,
    FToI,
    IToF,
    Add,
    Sub,
    Shr,
    Asr,
    Ror,
    Shl,
    Min,
    Max,
    And,
    Or,
    Xor,
    Not,
    Clz,
    V8Adds,
    V8Subs,
    FMul,
    Mul24,
    V8Muld,
    V8Min,
    V8Max,
}

impl AluOp {
    pub fn name(&self) -> &'static str {
        match self {
            AluOp::FAdd => "fadd",
            AluOp::FSub => "fsub",
            AluOp::FMin => "fmin",
            AluOp::FMax => "fmax",
            AluOp::FMinAbs => "fminabs",
            AluOp::FMaxAbs => "fmaxabs",
            AluOp::FToI => "ftoi",
            AluOp::IToF => "itof",
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Shr => "shr",
            AluOp::Asr => "asr",
            AluOp::Ror => "ror",
            AluOp::Shl => "shl",
            AluOp::Min => "min",
            AluOp::Max => "max",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
            AluOp::Not => "not",
            AluOp::Clz => "clz",
            AluOp::V8Adds => "v8adds",
            AluOp::V8Subs => "v8subs",
            AluOp::FMul => "fmul",
            AluOp::Mul24 => "mul24",
            AluOp::V8Muld => "v8muld",
            AluOp::V8Min => "v8min",
            AluOp::V8Max => "v8max",
        }
    }

    pub fn num_srcs(&self) -> usize {
        match self {
            AluOp::FToI | AluOp::IToF | AluOp::Not | AluOp::Clz => 1,
            _ => 2,
        }
    }
}

/// Branch condition, evaluated across all SIMD elements
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BranchCond {
    Always,
    AllZeroSet,
    AllZeroClear,
    AnyZeroSet,
    AnyZeroClear,
    AllNegativeSet,
    AllNegativeClear,
    AnyNegativeSet,
    AnyNegativeClear,
    AllCarrySet,
    AllCarryClear,
    AnyCarrySet,
    AnyCarryClear,
}

impl fmt::Display for BranchCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchCond::Always => "",
            BranchCond::AllZeroSet => ".allz",
            BranchCond::AllZeroClear => ".allnz",
            BranchCond::AnyZeroSet => ".anyz",
            BranchCond::AnyZeroClear => ".anynz",
            BranchCond::AllNegativeSet => ".alln",
            BranchCond::AllNegativeClear => ".allnn",
            BranchCond::AnyNegativeSet => ".anyn",
            BranchCond::AnyNegativeClear => ".anynn",
            BranchCond::AllCarrySet => ".allc",
            BranchCond::AllCarryClear => ".allnc",
            BranchCond::AnyCarrySet => ".anyc",
            BranchCond::AnyCarryClear => ".anync",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MemoryScope {
    SubGroup,
    WorkGroup,
    Device,
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryScope::SubGroup => write!(f, "subgroup"),
            MemoryScope::WorkGroup => write!(f, "workgroup"),
            MemoryScope::Device => write!(f, "device"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpAlu {
    pub op: AluOp,
    pub dst: Value,
    pub srcs: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct OpMov {
    pub dst: Value,
    pub src: Value,
}

#[derive(Clone, Debug)]
pub struct OpLoadImm {
    pub dst: Value,
    pub imm: Immediate,
}

#[derive(Clone, Debug)]
pub struct OpNop {
    pub delay: DelayType,
}

#[derive(Clone, Debug)]
pub struct OpRotate {
    pub dst: Value,
    /// Source and rotation offset
    pub srcs: [Value; 2],
}

impl OpRotate {
    pub fn src(&self) -> &Value {
        &self.srcs[0]
    }

    pub fn offset(&self) -> &Value {
        &self.srcs[1]
    }
}

#[derive(Clone, Debug)]
pub struct OpBranch {
    pub target: Value,
    pub cond: BranchCond,
}

#[derive(Clone, Debug)]
pub struct OpLabel {
    pub label: Value,
}

#[derive(Clone, Debug)]
pub struct OpMemBarrier {
    pub scope: MemoryScope,
}

/// Debug marker, never emitted
#[derive(Clone, Debug)]
pub struct OpAnnotate {
    pub annotation: String,
}

#[derive(Clone, Debug)]
pub enum Op {
    Alu(OpAlu),
    Mov(OpMov),
    LoadImm(OpLoadImm),
    Nop(OpNop),
    Rotate(OpRotate),
    Branch(OpBranch),
    Label(OpLabel),
    MemBarrier(OpMemBarrier),
    Annotate(OpAnnotate),
}

macro_rules! impl_op_from {
    ($($variant:ident($op:ident)),* $(,)?) => {
        $(
            impl From<$op> for Op {
                fn from(op: $op) -> Op {
                    Op::$variant(op)
                }
            }
        )*
    };
}

impl_op_from!(
    Alu(OpAlu),
    Mov(OpMov),
    LoadImm(OpLoadImm),
    Nop(OpNop),
    Rotate(OpRotate),
    Branch(OpBranch),
    Label(OpLabel),
    MemBarrier(OpMemBarrier),
    Annotate(OpAnnotate),
);

impl Op {
    pub fn dst(&self) -> Option<&Value> {
        match self {
            Op::Alu(op) => Some(&op.dst),
            Op::Mov(op) => Some(&op.dst),
            Op::LoadImm(op) => Some(&op.dst),
            Op::Rotate(op) => Some(&op.dst),
            Op::Label(op) => Some(&op.label),
            Op::Nop(_)
            | Op::Branch(_)
            | Op::MemBarrier(_)
            | Op::Annotate(_) => None,
        }
    }

    pub fn dst_mut(&mut self) -> Option<&mut Value> {
        match self {
            Op::Alu(op) => Some(&mut op.dst),
            Op::Mov(op) => Some(&mut op.dst),
            Op::LoadImm(op) => Some(&mut op.dst),
            Op::Rotate(op) => Some(&mut op.dst),
            Op::Label(op) => Some(&mut op.label),
            Op::Nop(_)
            | Op::Branch(_)
            | Op::MemBarrier(_)
            | Op::Annotate(_) => None,
        }
    }

    pub fn srcs(&self) -> &[Value] {
        match self {
            Op::Alu(op) => &op.srcs,
            Op::Mov(op) => slice::from_ref(&op.src),
            Op::Rotate(op) => &op.srcs,
            Op::Branch(op) => slice::from_ref(&op.target),
            Op::LoadImm(_)
            | Op::Nop(_)
            | Op::Label(_)
            | Op::MemBarrier(_)
            | Op::Annotate(_) => &[],
        }
    }

    pub fn srcs_mut(&mut self) -> &mut [Value] {
        match self {
            Op::Alu(op) => &mut op.srcs,
            Op::Mov(op) => slice::from_mut(&mut op.src),
            Op::Rotate(op) => &mut op.srcs,
            Op::Branch(op) => slice::from_mut(&mut op.target),
            Op::LoadImm(_)
            | Op::Nop(_)
            | Op::Label(_)
            | Op::MemBarrier(_)
            | Op::Annotate(_) => &mut [],
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Alu(op) => {
                write!(f, "{} = {}", op.dst, op.op.name())?;
                for (i, src) in op.srcs.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{src}")?;
                }
                Ok(())
            }
            Op::Mov(op) => write!(f, "{} = mov {}", op.dst, op.src),
            Op::LoadImm(op) => write!(f, "{} = ldi {}", op.dst, op.imm),
            Op::Nop(op) => write!(f, "nop ({})", op.delay),
            Op::Rotate(op) => {
                write!(f, "{} = rot {}, {}", op.dst, op.src(), op.offset())
            }
            Op::Branch(op) => write!(f, "br{} {}", op.cond, op.target),
            Op::Label(op) => write!(f, "label {}:", op.label),
            Op::MemBarrier(op) => write!(f, "membar {}", op.scope),
            Op::Annotate(op) => write!(f, "// {}", op.annotation),
        }
    }
}

/// Identity of an instruction, stable across moves within the method
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstrId(u32);

impl InstrId {
    pub(crate) const UNASSIGNED: InstrId = InstrId(u32::MAX);

    pub(crate) fn new(idx: u32) -> InstrId {
        assert!(idx < u32::MAX);
        InstrId(idx)
    }

    pub fn idx(&self) -> u32 {
        self.0
    }

    pub fn is_assigned(&self) -> bool {
        *self != InstrId::UNASSIGNED
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_assigned() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#?")
        }
    }
}

#[derive(Clone, Debug)]
pub struct Instr {
    id: InstrId,
    pub op: Op,
    pub cond: CondCode,
    pub set_flags: bool,
    pub signal: Signal,
    pub pack: Pack,
    pub unpack: Unpack,
    /// Whether the combiner may merge this with a neighbouring instruction
    pub can_be_combined: bool,
}

impl Instr {
    pub fn new(op: impl Into<Op>) -> Instr {
        Instr {
            id: InstrId::UNASSIGNED,
            op: op.into(),
            cond: CondCode::Always,
            set_flags: false,
            signal: Signal::None,
            pack: Pack::NOP,
            unpack: Unpack::NOP,
            can_be_combined: true,
        }
    }

    pub fn new_boxed(op: impl Into<Op>) -> Box<Instr> {
        Box::new(Instr::new(op))
    }

    pub fn new_nop(delay: DelayType) -> Box<Instr> {
        Instr::new_boxed(OpNop { delay })
    }

    pub fn with_cond(mut self, cond: CondCode) -> Instr {
        self.cond = cond;
        self
    }

    pub fn with_set_flags(mut self) -> Instr {
        self.set_flags = true;
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Instr {
        self.signal = signal;
        self
    }

    pub fn with_pack(mut self, pack: Pack) -> Instr {
        self.pack = pack;
        self
    }

    pub fn id(&self) -> InstrId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: InstrId) {
        self.id = id;
    }

    pub fn output(&self) -> Option<&Value> {
        self.op.dst()
    }

    pub fn args(&self) -> &[Value] {
        self.op.srcs()
    }

    pub fn arg(&self, idx: usize) -> Option<&Value> {
        self.args().get(idx)
    }

    pub fn is_nop(&self) -> bool {
        matches!(self.op, Op::Nop(_))
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.op, Op::Branch(_))
    }

    pub fn is_label(&self) -> bool {
        matches!(self.op, Op::Label(_))
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self.op, Op::MemBarrier(_))
    }

    pub fn has_conditional_execution(&self) -> bool {
        if let Op::Branch(br) = &self.op {
            if br.cond != BranchCond::Always {
                return true;
            }
        }
        self.cond != CondCode::Always
    }

    /// Whether this sets flags, sends a signal or accesses a port with side
    /// effects
    pub fn has_side_effects(&self) -> bool {
        if self.set_flags || self.signal != Signal::None {
            return true;
        }
        if let Some(reg) = self.output().and_then(Value::as_reg) {
            if reg.has_side_effects_on_write() {
                return true;
            }
        }
        self.args().iter().any(|arg| {
            arg.as_reg()
                .is_some_and(|reg| reg.has_side_effects_on_read())
        })
    }

    pub fn has_pack_mode(&self) -> bool {
        !self.pack.is_nop()
    }

    /// Whether this occupies a machine cycle
    pub fn maps_to_asm(&self) -> bool {
        !matches!(self.op, Op::Label(_) | Op::Annotate(_))
    }

    /// Every (local, kind) access of this instruction, one entry per operand
    pub fn local_uses(&self) -> impl Iterator<Item = (LocalId, UseKind)> + '_ {
        let writes = self
            .output()
            .and_then(Value::as_local)
            .map(|l| (l, UseKind::Writer));
        writes.into_iter().chain(
            self.args()
                .iter()
                .filter_map(Value::as_local)
                .map(|l| (l, UseKind::Reader)),
        )
    }

    pub fn reads_local(&self, local: LocalId) -> bool {
        self.args().iter().any(|arg| arg.has_local(local))
    }

    pub fn writes_local(&self, local: LocalId) -> bool {
        self.output().is_some_and(|out| out.has_local(local))
    }

    /// Rewrites every operand of the given kind from `old` to `new` and
    /// returns the number of operands changed
    pub fn replace_local(
        &mut self,
        old: LocalId,
        new: LocalId,
        kind: UseKind,
    ) -> usize {
        let mut count = 0;
        let mut rewrite = |v: &mut Value| {
            if let ValueKind::Local { local, .. } = &mut v.kind {
                if *local == old {
                    *local = new;
                    count += 1;
                }
            }
        };
        if kind.writes() {
            if let Some(dst) = self.op.dst_mut() {
                rewrite(dst);
            }
        }
        if kind.reads() {
            for src in self.op.srcs_mut() {
                rewrite(src);
            }
        }
        count
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if self.cond != CondCode::Always {
            write!(f, " ({})", self.cond)?;
        }
        if self.set_flags {
            write!(f, " (setf)")?;
        }
        if self.signal != Signal::None {
            write!(f, " ({})", self.signal)?;
        }
        if !self.pack.is_nop() {
            write!(f, " (pack {})", self.pack)?;
        }
        if !self.unpack.is_nop() {
            write!(f, " (unpack {})", self.unpack)?;
        }
        Ok(())
    }
}
