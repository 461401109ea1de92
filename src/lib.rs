//! Infrastructure descriptor and schema-creation function for the
//! Kaito application stack.
//!
//! The `synth` binary evaluates the [`descriptor`] into a
//! CloudFormation template. The `schema-creator` binary runs the
//! [`app`] handler as an AWS Lambda function.

pub mod app;
pub mod client;
pub mod conf;
pub mod descriptor;
pub mod schema;
pub mod sign;
