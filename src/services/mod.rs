pub mod archive;
pub mod batch;
pub mod error;
pub mod identifier;
pub mod renderer;
pub mod rows;
pub mod storage;
pub mod upload_service;
pub mod worker;
