//! The core intermediate representation: types, values, the opcode table,
//! the module/function/block/instruction graph, the builder API, and
//! textual parsing/serialization. Every other crate in the workspace is
//! built on top of the types re-exported here.

pub mod builder;
pub mod error;
pub mod ids;
pub mod lexer;
pub mod module;
pub mod opcode;
pub mod parser;
pub mod printer;
pub mod ty;
pub mod value;

pub use builder::ModuleBuilder;
pub use error::{BuilderError, ParseError};
pub use ids::{BlockId, FuncId, Interner, InstrId, Symbol, TempId};
pub use module::{
    BasicBlock, ExternDecl, ExternSig, Function, GlobalDef, GlobalInit, Instruction, Module,
    Param, SourceLoc, Target,
};
pub use opcode::{Opcode, OpcodeInfo, OperandKind, ResultKind};
pub use parser::parse;
pub use printer::serialize;
pub use ty::Ty;
pub use value::Value;
