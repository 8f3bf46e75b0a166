pub mod proto;
pub mod responder;
