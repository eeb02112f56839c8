// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Bounded-memory sorting core for columnar block pipelines.
//!
//! The crate provides pull-based block streams that turn an unordered
//! upstream into a globally sorted sequence of blocks:
//! - [`exec::sort::MergeSortStream`] buffers, optionally re-merges and
//!   spills, then merges everything back.
//! - [`exec::sort::FinishSortStream`] refines a stream already ordered by a
//!   key prefix, one chunk at a time.

pub mod common;
pub mod exec;
pub mod runtime;

pub use common::logging as blocksort_logging;

pub use exec::block::{Block, BlockColumn};
pub use exec::sort::{
    Collation, FinishSortStream, MergeSortOptions, MergeSortStream, SortColumnDesc, SortColumnRef,
    SortDescription, SortedBlocksMerger, SortedStreamsMerger,
};
pub use exec::stream::{BlockStream, MemoryBlockStream};
pub use runtime::profile::{RuntimeProfile, SortProfile};
