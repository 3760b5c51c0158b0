// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! akv-tool: exercise keys held in Azure Key Vault or Managed HSM from the command line.
//!
//! The tool loads keys through the same path as the OpenSSL engine, with the in-process key
//! objects of `akv::engine::soft` in place of OpenSSL's.

pub mod cli;
pub mod common;
pub mod error;
pub mod subcommands;
pub mod util;
