//! Multi-threaded packet decoding.
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::catalog::CatalogStore;
use crate::decoder::{DecodedPacket, DecoderConfig, PacketDecoder};
use crate::spacepacket::{Packet, Summary};
use crate::stream::PacketFilter;
use crate::{DecodeError, FramingError, ParallelError};

/// Decodes framed packets on a pool of worker threads.
///
/// Results come back in the same order the packets went in.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use tmtc::{CatalogStore, PacketReaderIter, ParallelDecoder};
///
/// let dat: Vec<u8> = vec![0x08, 0x64, 0xc0, 0x00, 0x00, 0x00, 0xff];
/// let packets = PacketReaderIter::new(std::io::Cursor::new(dat));
///
/// let decoder = ParallelDecoder::builder()
///     .catalog(Arc::new(CatalogStore::default()))
///     .num_threads(2)
///     .build();
/// let zults: Vec<_> = decoder.decode(packets).unwrap().collect();
/// assert_eq!(zults.len(), 1);
/// ```
#[derive(TypedBuilder)]
pub struct ParallelDecoder {
    catalog: Arc<CatalogStore>,
    /// Number of worker threads, 0 for one per cpu.
    #[builder(default)]
    num_threads: usize,
    #[builder(default)]
    config: DecoderConfig,
    #[builder(default)]
    filter: PacketFilter,
}

enum Outcome {
    Framing(FramingError),
    Filtered(Packet),
    Decoded(Packet, Result<DecodedPacket, DecodeError>),
}

impl ParallelDecoder {
    const DEFAULT_BUFFER_SIZE: usize = 1024;

    /// Starts decoding in the background and returns an iterator over the results.
    ///
    /// # Errors
    /// If the worker pool or the background thread could not be started.
    pub fn decode<P>(self, packets: P) -> Result<DecodedPacketIter, ParallelError>
    where
        P: IntoIterator<Item = Result<Packet, FramingError>>,
        P::IntoIter: Send + 'static,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|idx| format!("packet_decoder_{idx}"))
            .build()?;
        let (jobs_tx, jobs_rx) = bounded(Self::DEFAULT_BUFFER_SIZE);
        let packets = packets.into_iter();
        let catalog = self.catalog;
        let config = self.config;
        let filter = Arc::new(self.filter);

        let handle = thread::Builder::new()
            .name("packet_decoder".into())
            .spawn(move || {
                for zult in packets {
                    let (future_tx, future_rx) = unbounded();
                    match zult {
                        Ok(packet) => {
                            let catalog = catalog.clone();
                            let config = config.clone();
                            let filter = filter.clone();
                            // spawn_fifo keeps packets in order
                            pool.spawn_fifo(move || {
                                let outcome = decode_one(&catalog, config, &filter, packet);
                                if future_tx.send(outcome).is_err() {
                                    debug!("failed to send decoded packet");
                                }
                            });
                        }
                        Err(err) => {
                            if future_tx.send(Outcome::Framing(err)).is_err() {
                                debug!("failed to send framing error");
                            }
                        }
                    }
                    if let Err(err) = jobs_tx.send(future_rx) {
                        debug!("failed to send packet future: {err}");
                        break;
                    }
                }
            })?;

        Ok(DecodedPacketIter {
            jobs: jobs_rx,
            handle: Some(handle),
            summary: Summary::default(),
        })
    }
}

fn decode_one(
    catalog: &CatalogStore,
    config: DecoderConfig,
    filter: &PacketFilter,
    packet: Packet,
) -> Outcome {
    let decoder = PacketDecoder::with_config(catalog, config);
    match decoder.decode_header(&packet.data) {
        Ok(header) if !filter.accepts(&header) => Outcome::Filtered(packet),
        Ok(header) => {
            let zult = decoder.decode_body(header, &packet.data);
            Outcome::Decoded(packet, zult)
        }
        Err(err) => Outcome::Decoded(packet, Err(err.into())),
    }
}

/// Ordered results of a [ParallelDecoder].
pub struct DecodedPacketIter {
    jobs: Receiver<Receiver<Outcome>>,
    handle: Option<JoinHandle<()>>,
    summary: Summary,
}

impl DecodedPacketIter {
    /// Stats for the packets produced so far.
    #[must_use]
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    #[must_use]
    pub fn into_summary(self) -> Summary {
        self.summary
    }

    fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("packet decoder thread panicked");
            }
        }
    }
}

impl Iterator for DecodedPacketIter {
    type Item = Result<DecodedPacket, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // blocks until the next packet in order is available
            let Ok(rx) = self.jobs.recv() else {
                self.finish();
                return None;
            };
            let Ok(outcome) = rx.recv() else {
                self.summary.dropped += 1;
                warn!("packet decode job dropped");
                continue;
            };
            let zult = match outcome {
                Outcome::Framing(err) => Err(DecodeError::Framing(err)),
                Outcome::Filtered(packet) => {
                    self.summary.add(&packet);
                    self.summary.add_filtered();
                    continue;
                }
                Outcome::Decoded(packet, zult) => {
                    self.summary.add(&packet);
                    zult
                }
            };
            self.summary.record(&zult);
            return Some(zult);
        }
    }
}
