use std::io::{stdout, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use hifitime::{Duration, Epoch};
use serde::Serialize;
use tmtc::{CatalogStore, DecodeError, PacketStream, Scet, Summary};

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

/// Spacecraft time range covered by the input.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeSpan {
    first_scet: Option<f64>,
    last_scet: Option<f64>,
    first_time: Option<Epoch>,
    last_time: Option<Epoch>,
    duration: Option<Duration>,
}

impl TimeSpan {
    fn add(&mut self, scet: &Scet, epoch: Option<Epoch>) {
        let seconds = scet.seconds();
        if self.first_scet.map_or(true, |first| seconds < first) {
            self.first_scet = Some(seconds);
            self.first_time = epoch.map(|base| scet.epoch(base));
        }
        if self.last_scet.map_or(true, |last| seconds > last) {
            self.last_scet = Some(seconds);
            self.last_time = epoch.map(|base| scet.epoch(base));
        }
        if let (Some(first), Some(last)) = (self.first_time, self.last_time) {
            self.duration = Some(last - first);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Info<'a> {
    filename: String,
    #[serde(flatten)]
    span: Option<TimeSpan>,
    summary: &'a Summary,
}

fn summarize(catalog: &CatalogStore, fpath: &Path, epoch: Option<Epoch>) -> Result<(Summary, TimeSpan)> {
    let reader = std::fs::File::open(fpath).with_context(|| format!("failed to open input {fpath:?}"))?;
    let mut stream = PacketStream::new(catalog, BufReader::new(reader));
    let mut span = TimeSpan::default();

    for zult in stream.by_ref() {
        let header = match &zult {
            Ok(packet) => Some(&packet.header),
            Err(err) => err.header(),
        };
        if let Some(scet) = header.and_then(|h| h.secondary.as_ref()?.scet()) {
            span.add(&scet, epoch);
        }
        if let Err(DecodeError::Framing(err)) = &zult {
            tracing::warn!("{err}");
        }
    }

    Ok((stream.into_summary(), span))
}

pub fn info(catalog: &Path, fpath: &Path, format: &Format, epoch: Option<Epoch>) -> Result<()> {
    let catalog = CatalogStore::load(catalog)
        .with_context(|| format!("failed to load catalog {catalog:?}"))?;
    let (summary, span) = summarize(&catalog, fpath, epoch)?;
    let filename = fpath.to_string_lossy().to_string();

    match format {
        Format::Json => {
            let info = Info {
                filename,
                span: Some(span),
                summary: &summary,
            };
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_summary(&filename, &summary, Some(span)).context("serializing info")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

pub fn render_summary(filename: &str, summary: &Summary, span: Option<TimeSpan>) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("registering template")?;

    let info = Info {
        filename: filename.to_string(),
        span,
        summary,
    };
    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===============================================================================
First:        {{ first_scet }} {{ first_time }}
Last:         {{ last_scet }} {{ last_time }}
Duration:     {{ duration }}
APIDS:        {{ #each summary.apids }}{{ @key }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
Count:        {{ summary.count }}
Bytes:        {{ summary.bytes }}
Missing:      {{ summary.missing }}
Decoded:      {{ summary.decoded }} ({{ summary.with_warnings }} with warnings)
Filtered:     {{ summary.filtered }}
Header:       {{ summary.header_errors }}
Unknown:      {{ summary.unknown }}
Unidentified: {{ summary.unidentified }}
Truncated:    {{ summary.truncated }}
Framing:      {{ summary.framing_errors }}
Dropped:      {{ summary.dropped }}
-------------------------------------------------------------------------------
  APID      Count        Bytes   Missing   Decoded  Warnings    Failed
-------------------------------------------------------------------------------
{{ #each summary.apids }}{{ lpad 6 @key }}  {{ lpad 9 count }}  {{ lpad 11 bytes }}  {{ lpad 8 missing }}  {{ lpad 8 decoded }}  {{ lpad 8 with_warnings }}  {{ lpad 8 failed }}
{{/each }}
";

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn time_span_tracks_extremes() {
        let base = Epoch::from_str("2000-01-01T00:00:00Z").unwrap();
        let mut span = TimeSpan::default();
        for coarse in [20, 10, 30] {
            let scet = Scet {
                coarse,
                fine: 0,
                fine_bits: 16,
            };
            span.add(&scet, Some(base));
        }

        assert_eq!(span.first_scet, Some(10.0));
        assert_eq!(span.last_scet, Some(30.0));
        assert_eq!(span.duration, Some(Duration::from_seconds(20.0)));
    }

    #[test]
    fn render_empty_summary() {
        let text = render_summary("input.dat", &Summary::default(), None).unwrap();
        assert!(text.starts_with("input.dat\n"));
        assert!(text.contains("Count:        0"));
    }
}
