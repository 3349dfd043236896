//! `lcc`: a bidirectional compiler/decompiler between a restricted
//! scripting DSL and a flight-controller logic-condition rule table.
//!
//! The pipeline is a straight line, each stage owning one file:
//! [`lexer`] → [`parser`] → [`analyzer`] → [`vars`] → [`optimizer`] →
//! [`codegen`] produces a rule table; [`decompiler`] runs the wire format
//! back to source. [`orchestrator`] wires the stages together and is the
//! only module [`crate::bin`] needs to call.

pub mod analyzer;
pub mod ast;
pub mod catalog;
pub mod codegen;
pub mod decompiler;
pub mod diagnostics;
pub mod instruction;
pub mod lexer;
pub mod optimizer;
pub mod orchestrator;
pub mod parser;
pub mod vars;
