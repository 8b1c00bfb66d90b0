// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An abstract syntax tree for the unstructured Boogie programs that the race
//! checker reads, rewrites and hands to the verifier.

pub mod boogie_program;
