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
//! Integration tests for the full-sort stream, including spill and
//! cancellation behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use blocksort::exec::block::Block;
use blocksort::{
    BlockStream, Collation, MemoryBlockStream, MergeSortOptions, MergeSortStream, RuntimeProfile,
    SortColumnDesc, SortProfile,
};

mod common;
use common::*;

fn sort_values(blocks: Vec<Block>, options: MergeSortOptions) -> Vec<i64> {
    let mut stream = MergeSortStream::new(stream_of(blocks), options).unwrap();
    drain_int_column(&mut stream, 0)
}

fn key_options() -> MergeSortOptions {
    MergeSortOptions::new(vec![SortColumnDesc::by_name("k")], 1024)
}

#[test]
fn sorts_values_across_blocks() {
    let blocks = vec![int_block(vec![3, 1]), int_block(vec![2])];
    assert_eq!(sort_values(blocks, key_options()), vec![1, 2, 3]);
}

#[test]
fn limit_caps_emitted_rows() {
    let blocks = vec![int_block(vec![3, 1]), int_block(vec![2])];
    let mut options = key_options();
    options.limit = 2;
    assert_eq!(sort_values(blocks, options), vec![1, 2]);
}

#[test]
fn limit_caps_single_buffered_block() {
    // One buffered block takes the merger's passthrough path; the cap must
    // still hold.
    let blocks = vec![int_block(vec![5, 4, 3, 2, 1])];
    let mut options = key_options();
    options.limit = 2;
    assert_eq!(sort_values(blocks, options), vec![1, 2]);
}

#[test]
fn empty_upstream_is_eof() {
    let header = int_block(vec![]).clone_empty();
    let input = Box::new(MemoryBlockStream::new(header, vec![]));
    let mut stream = MergeSortStream::new(input, key_options()).unwrap();
    assert!(stream.read().unwrap().is_none());
    assert!(stream.read().unwrap().is_none());
}

#[test]
fn zero_row_blocks_are_skipped() {
    let blocks = vec![int_block(vec![]), int_block(vec![2, 1]), int_block(vec![])];
    assert_eq!(sort_values(blocks, key_options()), vec![1, 2]);
}

#[test]
fn unknown_sort_column_fails_at_construction() {
    let blocks = vec![int_block(vec![1])];
    let options = MergeSortOptions::new(vec![SortColumnDesc::by_name("missing")], 1024);
    assert!(MergeSortStream::new(stream_of(blocks), options).is_err());
}

#[test]
fn constant_column_is_stripped_and_restored() {
    let blocks = vec![
        const_and_key_block(7, vec![5, 2]),
        const_and_key_block(7, vec![4, 1]),
    ];
    let options = MergeSortOptions::new(vec![SortColumnDesc::by_name("k")], 3);
    let mut stream = MergeSortStream::new(stream_of(blocks), options).unwrap();

    let mut keys = Vec::new();
    while let Some(block) = stream.read().unwrap() {
        assert!(block.column(0).is_const(), "constant column must survive");
        assert!(int_column(&block, 0).iter().all(|c| *c == 7));
        keys.extend(int_column(&block, 1));
    }
    assert_eq!(keys, vec![1, 2, 4, 5]);
}

#[test]
fn const_only_sort_key_forwards_blocks_unchanged() {
    let blocks = vec![
        const_and_key_block(7, vec![5, 2]),
        const_and_key_block(7, vec![4, 1]),
    ];
    let options = MergeSortOptions::new(vec![SortColumnDesc::by_name("c")], 1024);
    let mut stream = MergeSortStream::new(stream_of(blocks), options).unwrap();

    let out = drain_blocks(&mut stream);
    assert_eq!(out.len(), 2);
    assert_eq!(int_column(&out[0], 1), vec![5, 2]);
    assert_eq!(int_column(&out[1], 1), vec![4, 1]);
    assert!(out[0].column(0).is_const());
}

fn spill_input_blocks() -> Vec<Block> {
    (0..10)
        .map(|i| {
            let values: Vec<i64> = (0..1000)
                .map(|j| ((i * 1000 + j) * 2654435761i64) % 1_000_003)
                .collect();
            int_block(values)
        })
        .collect()
}

#[test]
fn spilling_matches_in_memory_sort_and_counts_parts() {
    let baseline = sort_values(spill_input_blocks(), key_options());
    assert!(baseline.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(baseline.len(), 10_000);

    let block_bytes = spill_input_blocks()[0].allocated_bytes();
    let tmp_dir = tempfile::tempdir().unwrap();
    let profile = RuntimeProfile::new();
    let sort_profile = SortProfile::new(&profile);

    let mut options = key_options();
    // Trip the spill on every third block: three spills, one block residue.
    options.max_bytes_before_external_sort = block_bytes * 2 + block_bytes / 2;
    options.tmp_path = tmp_dir.path().to_path_buf();
    let mut stream = MergeSortStream::new(stream_of(spill_input_blocks()), options)
        .unwrap()
        .with_profile(sort_profile.clone());
    let spilled = drain_int_column(&mut stream, 0);

    assert_eq!(spilled, baseline);
    assert_eq!(sort_profile.external_sort_write_part.value(), 3);
    assert_eq!(sort_profile.external_sort_merge.value(), 1);
    assert_eq!(sort_profile.spill_rows.value(), 9000);

    // Spill files live for the stream's lifetime and are removed on drop.
    drop(stream);
    assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
}

#[test]
fn spill_threshold_does_not_change_output() {
    let baseline = sort_values(spill_input_blocks(), key_options());
    let block_bytes = spill_input_blocks()[0].allocated_bytes();
    let tmp_dir = tempfile::tempdir().unwrap();

    for threshold in [block_bytes / 2, block_bytes * 100] {
        let mut options = key_options();
        options.max_bytes_before_external_sort = threshold;
        options.tmp_path = tmp_dir.path().to_path_buf();
        assert_eq!(
            sort_values(spill_input_blocks(), options),
            baseline,
            "threshold={threshold}"
        );
    }
}

#[test]
fn spill_partitions_honor_limit() {
    let make_blocks = || -> Vec<Block> {
        (0..3)
            .map(|i| int_block((0..200).map(|j| ((i * 200 + j) * 7919) % 3001).collect()))
            .collect()
    };

    let mut options = key_options();
    options.limit = 5;
    let baseline = sort_values(make_blocks(), options);
    assert_eq!(baseline.len(), 5);

    // Every block trips the spill on its own, so each partition goes
    // through the single-block path and must still cap at the limit.
    let block_bytes = make_blocks()[0].allocated_bytes();
    let tmp_dir = tempfile::tempdir().unwrap();
    let profile = RuntimeProfile::new();
    let sort_profile = SortProfile::new(&profile);
    let mut options = key_options();
    options.limit = 5;
    options.max_bytes_before_external_sort = block_bytes / 2;
    options.tmp_path = tmp_dir.path().to_path_buf();
    let mut stream = MergeSortStream::new(stream_of(make_blocks()), options)
        .unwrap()
        .with_profile(sort_profile.clone());

    assert_eq!(drain_int_column(&mut stream, 0), baseline);
    assert_eq!(sort_profile.external_sort_write_part.value(), 3);
    assert_eq!(sort_profile.external_sort_merge.value(), 1);
}

#[test]
fn remerge_preserves_output_under_limit() {
    let blocks: Vec<Block> = (0..20)
        .map(|i| int_block((0..100).map(|j| ((i * 100 + j) * 7919) % 1009).collect()))
        .collect();

    let mut options = key_options();
    options.limit = 5;
    let baseline = sort_values(blocks.clone(), options);
    assert_eq!(baseline.len(), 5);

    let block_bytes = blocks[0].allocated_bytes();
    let mut options = key_options();
    options.limit = 5;
    options.max_bytes_before_remerge = block_bytes * 3;
    assert_eq!(sort_values(blocks, options), baseline);
}

#[test]
fn descending_sort_with_nulls_first_key() {
    let blocks = vec![int_block(vec![3, 1]), int_block(vec![2, 9])];
    let mut level = SortColumnDesc::by_name("k");
    level.asc = false;
    let options = MergeSortOptions::new(vec![level], 1024);
    assert_eq!(sort_values(blocks, options), vec![9, 3, 2, 1]);
}

#[test]
fn nocase_collation_sorts_case_insensitively() {
    let blocks = vec![
        string_block(vec!["banana", "Apple"]),
        string_block(vec!["cherry", "apple"]),
    ];
    let mut level = SortColumnDesc::by_name("s");
    level.collation = Some(Collation::NoCase);
    let options = MergeSortOptions::new(vec![level], 1024);
    let mut stream = MergeSortStream::new(stream_of(blocks), options).unwrap();

    let mut values = Vec::new();
    while let Some(block) = stream.read().unwrap() {
        values.extend(string_column(&block, 0));
    }
    let folded: Vec<String> = values.iter().map(|v| v.to_lowercase()).collect();
    let mut expected = folded.clone();
    expected.sort();
    assert_eq!(folded, expected);
    assert_eq!(values.len(), 4);
}

/// Upstream wrapper that flips a cancellation flag after a fixed number of
/// reads, standing in for the host executor.
struct CancellingStream {
    inner: MemoryBlockStream,
    flag: Arc<AtomicBool>,
    reads_before_cancel: usize,
}

impl BlockStream for CancellingStream {
    fn header(&self) -> &Block {
        self.inner.header()
    }

    fn read(&mut self) -> Result<Option<Block>, String> {
        if self.reads_before_cancel == 0 {
            self.flag.store(true, Ordering::Relaxed);
        } else {
            self.reads_before_cancel -= 1;
        }
        self.inner.read()
    }
}

#[test]
fn cancellation_aborts_spill_and_reports_eof() {
    let blocks: Vec<Block> = (0..6)
        .map(|i| int_block((0..500).map(|j| (i * 500 + j) % 131).collect()))
        .collect();
    let block_bytes = blocks[0].allocated_bytes();
    let tmp_dir = tempfile::tempdir().unwrap();
    let flag = Arc::new(AtomicBool::new(false));

    let input = CancellingStream {
        inner: MemoryBlockStream::from_blocks(blocks).unwrap(),
        flag: Arc::clone(&flag),
        // The first spill (after two blocks) completes before the flag flips.
        reads_before_cancel: 2,
    };
    let profile = RuntimeProfile::new();
    let sort_profile = SortProfile::new(&profile);
    let mut options = key_options();
    options.max_bytes_before_external_sort = block_bytes + block_bytes / 2;
    options.tmp_path = tmp_dir.path().to_path_buf();
    let mut stream = MergeSortStream::new(Box::new(input), options)
        .unwrap()
        .with_cancel_flag(Arc::clone(&flag))
        .with_profile(sort_profile.clone());

    assert!(stream.read().unwrap().is_none());
    assert!(stream.read().unwrap().is_none());
    // First spill ran to completion, the second was abandoned mid-copy.
    assert_eq!(sort_profile.external_sort_write_part.value(), 2);
    assert_eq!(sort_profile.external_sort_merge.value(), 0);

    drop(stream);
    assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
}
