mod apply;
mod chat;
mod console;
mod parse;
mod serve;

pub use apply::run_apply;
pub use chat::{run_chat, ChatOptions};
pub use parse::run_parse;
pub use serve::run_serve;
