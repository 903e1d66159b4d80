//! Graph structure shared by the layout stages
//!
//! - `LayoutGraph`: dense-index DAG with seq-ordered traversal

mod dag;

pub use dag::{AdjVec, LayoutGraph};
