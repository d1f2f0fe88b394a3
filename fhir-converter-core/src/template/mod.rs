// Template Language
//
// Liquid-style templates: `lexer` splits source into markup and expression
// tokens, `parser` builds the node tree, `scope` holds render-time variables
// and `render` evaluates a tree into text.

pub mod lexer;
pub mod parser;
pub mod render;
pub mod scope;

pub use parser::{Node, Template};
pub use render::{LoggingVisitor, NoopVisitor, RenderContext, RenderVisitor};
pub use scope::{FrameKind, Scope};
