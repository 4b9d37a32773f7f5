use std::io::{self, Write};
use std::iter;

use serde::Serialize;
use tracing::debug;

use crate::batch::BatchExt;
use crate::Result;

/// Where the header row of the clean CSV comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPolicy {
    /// `col_1..col_N`, N fixed by the widest record of the first batch
    Synthetic,
    /// The first record is the header; records keep their own widths
    FirstRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepartitionStats {
    pub width: usize,
    pub batches: usize,
    pub records_written: u64,
    pub padded: u64,
    pub skipped_blank: u64,
    pub skipped_malformed: u64,
}

/// Splits normalized lines on a single-character delimiter into CSV records
pub struct Repartitioner {
    delimiter: char,
    batch_size: usize,
    header: HeaderPolicy,
}

impl Repartitioner {
    #[must_use]
    pub fn new(delimiter: char, batch_size: usize, header: HeaderPolicy) -> Self {
        Self {
            delimiter,
            batch_size: batch_size.max(1),
            header,
        }
    }

    /// Write `lines` as comma-delimited records, header first, batch by batch.
    pub fn repartition<I, W>(&self, lines: I, writer: W) -> Result<RepartitionStats>
    where
        I: Iterator<Item = io::Result<String>>,
        W: Write,
    {
        let mut out = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(writer);
        let mut stats = RepartitionStats::default();
        let mut header_written = false;

        for (index, batch) in lines.batched(self.batch_size).enumerate() {
            let batch = batch?;
            stats.batches += 1;

            let mut records = Vec::with_capacity(batch.len());
            for line in &batch {
                let fields: Vec<&str> = line.split(self.delimiter).collect();
                if fields.iter().all(|f| f.trim().is_empty()) {
                    stats.skipped_blank += 1;
                } else {
                    records.push(fields);
                }
            }

            let mut records = records.into_iter();

            if !header_written {
                match self.header {
                    HeaderPolicy::Synthetic => {
                        let Some(width) = records.as_slice().iter().map(Vec::len).max() else {
                            continue;
                        };
                        out.write_record((1..=width).map(|i| format!("col_{i}")))?;
                        stats.width = width;
                    }
                    HeaderPolicy::FirstRecord => {
                        let Some(header) = records.next() else {
                            continue;
                        };
                        out.write_record(&header)?;
                        stats.width = header.len();
                    }
                }
                header_written = true;
            }

            for fields in records {
                self.write_fields(&mut out, &fields, &mut stats)?;
            }

            debug!(
                batch = index,
                lines = batch.len(),
                written = stats.records_written,
                "repartitioned batch"
            );
        }

        out.flush()?;
        Ok(stats)
    }

    fn write_fields<W: Write>(
        &self,
        out: &mut csv::Writer<W>,
        fields: &[&str],
        stats: &mut RepartitionStats,
    ) -> Result<()> {
        if self.header == HeaderPolicy::FirstRecord {
            out.write_record(fields)?;
            stats.records_written += 1;
            return Ok(());
        }

        let width = stats.width;
        if fields.len() > width {
            stats.skipped_malformed += 1;
            return Ok(());
        }
        if fields.len() < width {
            stats.padded += 1;
        }

        let padding = iter::repeat_n("", width - fields.len());
        out.write_record(fields.iter().copied().chain(padding))?;
        stats.records_written += 1;
        Ok(())
    }
}
