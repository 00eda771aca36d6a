// Stream responder: header line, then one CSV line per fetched row
//
// Each chunk is a complete CSV record. A row is encoded and handed to the HTTP
// body before the fetcher is asked for the next one.

use bytes::Bytes;
use csv::{Terminator, WriterBuilder};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use tracing::{error, info};

use crate::fetcher::HotelFetcher;
use crate::search::{OutputRow, CSV_HEADER};

// Row-at-a-time CSV encoder; every record gets its own in-memory writer
pub struct CsvRowEncoder {
    builder: WriterBuilder,
}

impl Default for CsvRowEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvRowEncoder {
    pub fn new() -> Self {
        let mut builder = WriterBuilder::new();
        builder.has_headers(false).terminator(Terminator::CRLF);
        Self { builder }
    }

    pub fn header(&mut self) -> Result<Bytes, csv::Error> {
        let mut writer = self.builder.from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;
        finish(writer)
    }

    pub fn encode(&mut self, row: &OutputRow) -> Result<Bytes, csv::Error> {
        let mut writer = self.builder.from_writer(Vec::new());
        writer.serialize(row)?;
        finish(writer)
    }
}

// A failed record drops its buffer with the writer, so nothing partial reaches the next chunk
fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Bytes, csv::Error> {
    writer
        .into_inner()
        .map(Bytes::from)
        .map_err(|e| e.into_error().into())
}

pub struct CsvResponder {
    encoder: CsvRowEncoder,
    fetcher: HotelFetcher,
    header_sent: bool,
    done: bool,
}

impl CsvResponder {
    pub fn new(fetcher: HotelFetcher) -> Self {
        Self {
            encoder: CsvRowEncoder::new(),
            fetcher,
            header_sent: false,
            done: false,
        }
    }

    // Next body chunk; None ends the response
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }

        let chunk = if !self.header_sent {
            self.header_sent = true;
            self.encoder.header()
        } else {
            match self.fetcher.next_row().await {
                Some(row) => self.encoder.encode(&row),
                None => {
                    self.done = true;
                    info!(
                        keyword = self.fetcher.params().keyword(),
                        rows = self.fetcher.rows_emitted(),
                        "CSV export complete"
                    );
                    return None;
                }
            }
        };

        match chunk {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                // The status line is already out; all we can do is stop
                error!(error = %e, "CSV encoding failed, ending export early");
                self.done = true;
                None
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        stream::unfold(self, |mut responder| async move {
            let chunk = responder.next_chunk().await?;
            Some((Ok(chunk), responder))
        })
    }
}
