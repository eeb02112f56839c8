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
//! Full sort of an unordered block stream under bounded memory.
//!
//! Responsibilities:
//! - Accumulate upstream blocks, re-merging in memory when a limit makes
//!   that profitable and spilling sorted runs to disk under memory pressure.
//! - Merge the memory residue with the spilled runs into one sorted output
//!   stream, re-inserting constant columns on emission.
//!
//! Current limitations:
//! - A single caller drives the stream; the cancellation observer is the
//!   only cross-thread signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::blocksort_logging::{debug, info};
use crate::exec::block::Block;
use crate::exec::sort::{
    SortDescription, SortKeyFormat, SortedBlocksMerger, SortedStreamsMerger,
    enrich_block_with_constants, remove_constants_from_block, remove_constants_from_description,
};
use crate::exec::spill::{IpcCodec, SpillBlockStream, SpillWriter, TempSpillFile};
use crate::exec::stream::BlockStream;
use crate::runtime::profile::SortProfile;

/// Construction parameters for [`MergeSortStream`].
#[derive(Debug, Clone)]
pub struct MergeSortOptions {
    /// Sort key, ordered.
    pub description: SortDescription,
    /// Target row count per output block. Must be positive.
    pub max_merged_block_size: usize,
    /// Hard cap on emitted rows; 0 means unbounded.
    pub limit: usize,
    /// Re-merge trigger threshold in buffered bytes; 0 disables re-merging.
    pub max_bytes_before_remerge: usize,
    /// Spill trigger threshold in buffered bytes; 0 disables spilling.
    pub max_bytes_before_external_sort: usize,
    /// Directory for spill files, created on first spill.
    pub tmp_path: PathBuf,
    /// Compression for spill file bodies.
    pub spill_codec: IpcCodec,
}

impl MergeSortOptions {
    pub fn new(description: SortDescription, max_merged_block_size: usize) -> Self {
        Self {
            description,
            max_merged_block_size,
            limit: 0,
            max_bytes_before_remerge: 0,
            max_bytes_before_external_sort: 0,
            tmp_path: std::env::temp_dir(),
            spill_codec: IpcCodec::Lz4,
        }
    }
}

/// Sorts the whole upstream, spilling sorted runs to disk when the buffered
/// bytes exceed the external-sort threshold.
pub struct MergeSortStream {
    input: Box<dyn BlockStream>,
    header: Block,
    header_without_constants: Block,
    description: SortDescription,
    max_merged_block_size: usize,
    limit: usize,
    max_bytes_before_remerge: usize,
    max_bytes_before_external_sort: usize,
    tmp_path: PathBuf,
    spill_codec: IpcCodec,
    cancelled: Arc<AtomicBool>,
    profile: Option<SortProfile>,
    format: SortKeyFormat,

    blocks: Vec<Block>,
    sum_rows_in_blocks: usize,
    sum_bytes_in_blocks: usize,
    remerge_is_useful: bool,
    temporary_files: Vec<TempSpillFile>,
    merger: Option<Box<dyn BlockStream>>,
    done: bool,
}

impl MergeSortStream {
    pub fn new(input: Box<dyn BlockStream>, options: MergeSortOptions) -> Result<Self, String> {
        if options.max_merged_block_size == 0 {
            return Err("max_merged_block_size must be positive".to_string());
        }
        let header = input.header().clone();
        let header_without_constants = remove_constants_from_block(&header)?;
        let description = remove_constants_from_description(&header, &options.description)?;
        // Resolves the key once; bad descriptions fail here, not inside the
        // first merge.
        let format = SortKeyFormat::new(&header_without_constants, &description)?;
        Ok(Self {
            input,
            header,
            header_without_constants,
            description,
            max_merged_block_size: options.max_merged_block_size,
            limit: options.limit,
            max_bytes_before_remerge: options.max_bytes_before_remerge,
            max_bytes_before_external_sort: options.max_bytes_before_external_sort,
            tmp_path: options.tmp_path,
            spill_codec: options.spill_codec,
            cancelled: Arc::new(AtomicBool::new(false)),
            profile: None,
            format,
            blocks: Vec::new(),
            sum_rows_in_blocks: 0,
            sum_bytes_in_blocks: 0,
            remerge_is_useful: true,
            temporary_files: Vec::new(),
            merger: None,
            done: false,
        })
    }

    /// Shares a cancellation observer with the host executor; a set flag
    /// makes the stream stop at the next boundary and report end of stream.
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn with_profile(mut self, profile: SortProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn should_remerge(&self) -> bool {
        self.blocks.len() > 1
            && self.limit > 0
            && self.limit * 2 < self.sum_rows_in_blocks
            && self.remerge_is_useful
            && self.max_bytes_before_remerge > 0
            && self.sum_bytes_in_blocks > self.max_bytes_before_remerge
    }

    fn buffered_merger(&mut self) -> Result<SortedBlocksMerger, String> {
        SortedBlocksMerger::new(
            self.header_without_constants.clone(),
            std::mem::take(&mut self.blocks),
            &self.description,
            self.max_merged_block_size,
            self.limit,
        )
    }

    /// Consolidates the buffer through a limited merge. If that fails to
    /// halve the footprint the latch disables further attempts for good.
    fn remerge(&mut self) -> Result<(), String> {
        debug!(
            "re-merging intermediate sorted data ({} blocks with {} rows) to reduce memory use",
            self.blocks.len(),
            self.sum_rows_in_blocks
        );

        let mut merger = self.buffered_merger()?;
        let mut new_blocks = Vec::new();
        let mut new_sum_rows = 0usize;
        let mut new_sum_bytes = 0usize;
        while let Some(block) = merger.read()? {
            new_sum_rows += block.rows();
            new_sum_bytes = new_sum_bytes.saturating_add(block.allocated_bytes());
            new_blocks.push(block);
        }

        debug!(
            "memory use lowered from {} to {} bytes",
            self.sum_bytes_in_blocks, new_sum_bytes
        );
        if new_sum_bytes * 2 > self.sum_bytes_in_blocks {
            self.remerge_is_useful = false;
        }

        self.blocks = new_blocks;
        self.sum_rows_in_blocks = new_sum_rows;
        self.sum_bytes_in_blocks = new_sum_bytes;
        Ok(())
    }

    /// Sorts the buffer and streams it into a fresh temporary file. An
    /// observed cancellation abandons the partial file and returns; the
    /// caller checks the flag afterwards.
    fn spill_buffered_blocks(&mut self) -> Result<(), String> {
        std::fs::create_dir_all(&self.tmp_path).map_err(|e| {
            format!(
                "create spill directory {} failed: {e}",
                self.tmp_path.display()
            )
        })?;
        let file = TempSpillFile::create(&self.tmp_path)?;
        let spilled_rows = self.sum_rows_in_blocks;
        let spilled_bytes = self.sum_bytes_in_blocks;

        info!(
            "sorting and writing part of data into temporary file {}",
            file.path().display()
        );
        if let Some(profile) = &self.profile {
            profile.external_sort_write_part.add(1);
        }

        let mut writer = SpillWriter::create(
            file.path(),
            self.header_without_constants.schema(),
            self.spill_codec,
        )?;
        let mut merger = self.buffered_merger()?;
        self.sum_rows_in_blocks = 0;
        self.sum_bytes_in_blocks = 0;

        loop {
            if self.is_cancelled() {
                return Ok(());
            }
            match merger.read()? {
                Some(block) => writer.append_block(&block)?,
                None => break,
            }
        }
        writer.finish()?;
        info!(
            "done writing part of data into temporary file {}",
            file.path().display()
        );

        if let Some(profile) = &self.profile {
            profile.spill_rows.add(spilled_rows as i64);
            profile.spill_bytes.add(spilled_bytes as i64);
        }
        self.temporary_files.push(file);
        Ok(())
    }

    fn build_final_merger(&mut self) -> Result<Box<dyn BlockStream>, String> {
        if self.temporary_files.is_empty() {
            return Ok(Box::new(self.buffered_merger()?));
        }

        if let Some(profile) = &self.profile {
            profile.external_sort_merge.add(1);
        }
        info!(
            "there are {} temporary sorted parts to merge",
            self.temporary_files.len()
        );

        let mut inputs: Vec<Box<dyn BlockStream>> =
            Vec::with_capacity(self.temporary_files.len() + 1);
        for file in &self.temporary_files {
            inputs.push(Box::new(SpillBlockStream::open(
                file.path(),
                self.header_without_constants.clone(),
            )?));
        }
        if !self.blocks.is_empty() {
            inputs.push(Box::new(self.buffered_merger()?));
        }
        Ok(Box::new(SortedStreamsMerger::new(
            self.header_without_constants.clone(),
            inputs,
            &self.description,
            self.max_merged_block_size,
            self.limit,
        )?))
    }
}

impl BlockStream for MergeSortStream {
    fn header(&self) -> &Block {
        &self.header
    }

    fn read(&mut self) -> Result<Option<Block>, String> {
        // Only constant columns in the sort key: nothing to sort, forward
        // the upstream unchanged.
        if self.description.is_empty() {
            return self.input.read();
        }
        if self.done {
            return Ok(None);
        }

        if self.merger.is_none() {
            while let Some(block) = self.input.read()? {
                // Merging assumes every buffered block is sorted, so order
                // each one on arrival.
                let block = self.format.sort_block(&remove_constants_from_block(&block)?)?;
                self.sum_rows_in_blocks += block.rows();
                self.sum_bytes_in_blocks =
                    self.sum_bytes_in_blocks.saturating_add(block.allocated_bytes());
                self.blocks.push(block);

                if self.should_remerge() {
                    self.remerge()?;
                }

                if self.max_bytes_before_external_sort > 0
                    && self.sum_bytes_in_blocks > self.max_bytes_before_external_sort
                {
                    self.spill_buffered_blocks()?;
                    if self.is_cancelled() {
                        break;
                    }
                }
            }

            if (self.blocks.is_empty() && self.temporary_files.is_empty()) || self.is_cancelled() {
                self.done = true;
                return Ok(None);
            }
            self.merger = Some(self.build_final_merger()?);
        }

        let Some(merger) = self.merger.as_mut() else {
            return Ok(None);
        };
        match merger.read()? {
            Some(block) => Ok(Some(enrich_block_with_constants(&block, &self.header)?)),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}
