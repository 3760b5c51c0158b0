// Copyright 2021 Contributors to the Confidential Packaging project.
// SPDX-License-Identifier: MIT

//! Common constants.

pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");
pub const PROJECT_DESC: &str = "Signs and decrypts with keys held in Azure Key Vault or Managed HSM";
pub const PROJECT_AUTHOR: &str = "Contributors to the Confidential Packaging project";
pub const PROJECT_VERSION: &str = env!("CARGO_PKG_VERSION");
