pub mod cscope;

pub use cscope::CscopeIndex;
