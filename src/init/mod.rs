// SPDX-License-Identifier: Apache-2.0

pub mod args;
pub mod ingester;
pub mod sources;
pub mod wait;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
