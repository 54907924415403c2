use std::collections::HashSet;
use std::fs::File;
use std::hash::Hash;
use std::io::{stdout, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tmtc::{
    decode_all, deliver, Apid, CatalogStore, DecodedPacket, DecoderConfig, PacketFilter,
    PacketReaderIter, PacketSink, PacketStream, ParallelDecoder, StructureId, Summary,
};
use tracing::{info, warn};

use crate::info::render_summary;

pub struct Options {
    pub apids: Vec<u32>,
    pub services: Vec<u32>,
    pub spids: Vec<u32>,
    pub calibrate: bool,
    pub keep_raw: bool,
    pub threads: Option<usize>,
    pub summary: bool,
}

/// Writes each packet as a single line of JSON.
struct JsonLines<W: Write> {
    writer: W,
    failed: usize,
}

impl<W: Write> PacketSink for JsonLines<W> {
    fn accept(&mut self, packet: DecodedPacket) {
        let zult = serde_json::to_writer(&mut self.writer, &packet)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(err) = zult {
            self.failed += 1;
            warn!(apid = packet.header.apid(), "failed to write packet: {err}");
        }
    }
}

/// Set of `what` values, an error if any of them is out of range.
fn values<T>(what: &str, list: &[u32]) -> Result<HashSet<T>>
where
    T: TryFrom<u32> + Eq + Hash,
{
    let mut set = HashSet::with_capacity(list.len());
    for v in list {
        let Ok(value) = T::try_from(*v) else {
            bail!("{what} {v} is out of range");
        };
        set.insert(value);
    }
    Ok(set)
}

pub fn decode(catalog: &Path, input: &Path, opts: &Options) -> Result<()> {
    let filter = PacketFilter {
        apids: values::<Apid>("apid", &opts.apids)?,
        service_types: values::<u8>("service type", &opts.services)?,
        structure_ids: values::<StructureId>("structure id", &opts.spids)?,
    };
    let catalog = CatalogStore::load(catalog)
        .with_context(|| format!("failed to load catalog {catalog:?}"))?;
    let src = File::open(input).with_context(|| format!("failed to open input {input:?}"))?;

    let config = DecoderConfig::builder()
        .calibrate(opts.calibrate)
        .keep_raw(opts.keep_raw)
        .build();
    let mut sink = JsonLines {
        writer: BufWriter::new(stdout().lock()),
        failed: 0,
    };

    let summary: Summary = match opts.threads {
        Some(num_threads) if num_threads > 1 => {
            let decoder = ParallelDecoder::builder()
                .catalog(Arc::new(catalog))
                .num_threads(num_threads)
                .config(config)
                .filter(filter)
                .build();
            let mut results = decoder
                .decode(PacketReaderIter::new(BufReader::new(src)))
                .context("starting decoder")?;
            for zult in results.by_ref() {
                deliver(zult, &mut sink);
            }
            results.into_summary()
        }
        _ => {
            let stream =
                PacketStream::with_config(&catalog, BufReader::new(src), config).with_filter(filter);
            decode_all(stream, &mut sink)
        }
    };
    sink.writer.flush().context("flushing output")?;

    info!(
        packets = summary.count,
        decoded = summary.decoded,
        warnings = summary.with_warnings,
        failed = summary.failed(),
        filtered = summary.filtered,
        "done"
    );
    if sink.failed > 0 {
        warn!("{} packets could not be written", sink.failed);
    }
    if opts.summary {
        let text = render_summary(&input.to_string_lossy(), &summary, None)?;
        std::io::stderr()
            .write_all(text.as_bytes())
            .context("writing summary")?;
    }
    Ok(())
}
