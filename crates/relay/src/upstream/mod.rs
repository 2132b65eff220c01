// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Everything that talks to the upstream studio service.

pub mod conversation;
pub mod executor;
pub mod stream;
