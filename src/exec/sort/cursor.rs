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
//! Heap cursor over one sorted block's encoded key rows.

use std::cmp::Ordering;

use arrow::row::{Row, Rows};

/// Advancing position in one block, identified by its arena slot. The block
/// itself stays alive in the owning merger for the cursor's whole lifetime.
pub(crate) struct SortCursor {
    source: usize,
    pos: usize,
    rows: Rows,
}

impl SortCursor {
    /// `rows` must be non-empty; empty blocks never become cursors.
    pub(crate) fn new(source: usize, rows: Rows) -> Self {
        Self {
            source,
            pos: 0,
            rows,
        }
    }

    pub(crate) fn source(&self) -> usize {
        self.source
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_last(&self) -> bool {
        self.pos + 1 >= self.rows.num_rows()
    }

    pub(crate) fn advance(&mut self) {
        self.pos += 1;
    }

    fn current(&self) -> Row<'_> {
        self.rows.row(self.pos)
    }
}

impl PartialEq for SortCursor {
    fn eq(&self, other: &Self) -> bool {
        self.current() == other.current()
    }
}

impl Eq for SortCursor {}

impl PartialOrd for SortCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap keeps the largest element on top; reversing the key
        // compare makes the next row in sort order pop first. Equal keys
        // compare equal, so the order among them is unspecified.
        other.current().cmp(&self.current())
    }
}
