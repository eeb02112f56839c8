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
//! Runtime counters exposed by the sorting operators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

pub type CounterRef = Arc<Counter>;

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Named counter registry shared by all operators of one query.
#[derive(Debug, Clone, Default)]
pub struct RuntimeProfile {
    counters: Arc<Mutex<HashMap<String, CounterRef>>>,
}

impl RuntimeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter with the given name, creating it on first use.
    pub fn add_counter(&self, name: &str) -> CounterRef {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::default())),
        )
    }

    pub fn counter(&self, name: &str) -> Option<CounterRef> {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(name).map(Arc::clone)
    }
}

/// Counters maintained by the external sort path.
#[derive(Debug, Clone)]
pub struct SortProfile {
    pub external_sort_write_part: CounterRef,
    pub external_sort_merge: CounterRef,
    pub spill_rows: CounterRef,
    pub spill_bytes: CounterRef,
}

impl SortProfile {
    pub fn new(profile: &RuntimeProfile) -> Self {
        Self {
            external_sort_write_part: profile.add_counter("ExternalSortWritePart"),
            external_sort_merge: profile.add_counter("ExternalSortMerge"),
            spill_rows: profile.add_counter("SpillRows"),
            spill_bytes: profile.add_counter("SpillBytes"),
        }
    }
}
