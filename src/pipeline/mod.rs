//! The eight-component pipeline (§4): ingress queue, event validator,
//! subscription registry, broadcast engine, storage batcher, response
//! router, and historical query engine. The filter matcher (§4.5) lives in
//! `crate::model::filter` since it is pure data logic shared by the
//! broadcast engine and the historical query engine.

pub mod broadcast;
pub mod historical;
pub mod ingress;
pub mod policy_cache;
pub mod registry;
pub mod router;
pub mod storage_batcher;
pub mod validator;
