// snetc — S-Net type engine
//
// Library root. Passes run in the order resolve → route → typecheck →
// annotate; see `pass` and `pipeline`.

pub mod annotate;
pub mod ast;
pub mod diag;
pub mod extract;
pub mod fixpoint;
pub mod id;
pub mod infer;
pub mod pass;
pub mod pipeline;
pub mod record;
pub mod resolve;
pub mod route;
pub mod signature;
pub mod typecheck;
