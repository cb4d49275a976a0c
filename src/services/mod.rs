pub mod coordinator;
pub mod coordinator_client;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod transform;
pub mod worker;
