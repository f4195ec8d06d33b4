//! s3kit-s3: aws-sdk-s3 storage transport for s3kit
//!
//! This crate provides the implementation of the StorageTransport and
//! TransportFactory traits using the aws-sdk-s3 crate. It is the only crate
//! that directly depends on the AWS SDK.

pub mod client;

pub use client::{S3Transport, S3TransportFactory};
