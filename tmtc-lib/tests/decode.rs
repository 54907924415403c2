mod common;

use std::fs::{self, File};
use std::io::BufReader;
use std::sync::Arc;

use tmtc::{
    decode_all, CatalogStore, DecodeError, DecodedPacket, EngValue, PacketDecoder, PacketFilter,
    PacketReaderIter, PacketStream, ParallelDecoder, Warning,
};

use common::{hk_body, hk_packet, tm_packet, write_catalog, EVENT_SPID, HK_SPID};

fn load() -> (tempfile::TempDir, CatalogStore) {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = write_catalog(tmpdir.path());
    let catalog = CatalogStore::load(path).unwrap();
    (tmpdir, catalog)
}

fn eng(packet: &DecodedPacket, name: &str) -> Vec<EngValue> {
    packet.get(name).map(|p| p.eng_value.clone()).collect()
}

#[test]
fn hk_end_to_end() {
    let (_tmpdir, catalog) = load();
    let decoder = PacketDecoder::new(&catalog);

    let packet = decoder
        .decode(&hk_packet(0, 700, 1, &[-3, 10], Some(100)))
        .unwrap();

    assert_eq!(packet.header.apid(), common::APID);
    assert_eq!(packet.header.structure_id, Some(HK_SPID));
    let scet = packet.header.secondary.as_ref().unwrap().scet().unwrap();
    assert_eq!(scet.seconds(), 1000.5);

    let names: Vec<&str> = packet.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["TEMP", "MODE", "N", "V", "V", "EXTRA"]);
    assert_eq!(eng(&packet, "TEMP"), vec![EngValue::Number(300.0)]);
    assert_eq!(eng(&packet, "MODE"), vec![EngValue::Label("NOMINAL".into())]);
    assert_eq!(eng(&packet, "N"), vec![EngValue::Uncalibrated(2)]);
    assert_eq!(
        eng(&packet, "V"),
        vec![EngValue::Number(-5.0), EngValue::Number(21.0)]
    );
    assert_eq!(eng(&packet, "EXTRA"), vec![EngValue::Number(50.0)]);
    assert_eq!(packet.first("TEMP").unwrap().unit.as_deref(), Some("degC"));
    assert_eq!(packet.first("V").unwrap().raw_value, -3);
    assert!(packet.warnings.is_empty());
}

#[test]
fn conditional_group_skipped() {
    let (_tmpdir, catalog) = load();
    let decoder = PacketDecoder::new(&catalog);

    let packet = decoder.decode(&hk_packet(0, 100, 0, &[], None)).unwrap();

    assert_eq!(eng(&packet, "TEMP"), vec![EngValue::Number(0.0)]);
    assert_eq!(eng(&packet, "MODE"), vec![EngValue::Label("SAFE".into())]);
    assert!(packet.first("V").is_none());
    assert!(packet.first("EXTRA").is_none());
    assert!(packet.warnings.is_empty());
}

#[test]
fn service_lookup_selects_structure() {
    let (_tmpdir, catalog) = load();
    let decoder = PacketDecoder::new(&catalog);

    let packet = decoder
        .decode(&tm_packet(0, (5, 1), 0, &[0x12, 0x34]))
        .unwrap();
    assert_eq!(packet.header.structure_id, Some(EVENT_SPID));
    assert_eq!(packet.first("EVENT_ID").unwrap().raw_value, 0x1234);

    let err = decoder
        .decode(&tm_packet(0, (5, 2), 0, &[0x12, 0x34]))
        .unwrap_err();
    assert!(matches!(err, DecodeError::Unidentified { .. }));
}

#[test]
fn descriptions() {
    let (_tmpdir, catalog) = load();

    assert_eq!(catalog.describe("HK"), Some("Housekeeping parameters"));
    assert_eq!(catalog.describe("EVENT_REPORT"), Some("Informative event"));
    assert_eq!(catalog.describe("EVENT"), None);
    assert_eq!(catalog.parameter_description("TEMP"), Some("Board temperature"));
    assert_eq!(catalog.parameter_description("MODE"), None);
}

/// One of each outcome, followed by a partial packet.
fn write_stream(dir: &std::path::Path) -> std::path::PathBuf {
    let mut capped = hk_body(0, 0, &[7], None);
    capped[2] = 3;

    let mut dat = hk_packet(0, 700, 1, &[-3, 10], Some(100));
    dat.extend(tm_packet(1, (5, 1), 0, &[0x00, 0x01]));
    dat.extend(tm_packet(2, (5, 2), 0, &[0x00]));
    dat.extend(hk_packet(3, 0, 1, &[5], None));
    dat.extend(tm_packet(4, (3, 25), 0, &capped));
    dat.extend([0x08]);

    let path = dir.join("packets.dat");
    fs::write(&path, dat).unwrap();
    path
}

#[test]
fn decode_all_from_file() {
    let (tmpdir, catalog) = load();
    let path = write_stream(tmpdir.path());
    let stream = PacketStream::new(&catalog, BufReader::new(File::open(path).unwrap()));

    let mut sink = Vec::new();
    let summary = decode_all(stream, &mut sink);

    assert_eq!(sink.len(), 4);
    // partial packet from the truncated hk
    let names: Vec<&str> = sink[2].parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["TEMP", "MODE", "N", "V"]);
    assert_eq!(
        sink[3].warnings,
        vec![Warning::RepeatCapped {
            group: "SAMPLES".into(),
            requested: 3,
            allowed: 1
        }]
    );

    assert_eq!(summary.count, 5);
    assert_eq!(summary.decoded, 3);
    assert_eq!(summary.with_warnings, 1);
    assert_eq!(summary.unidentified, 1);
    assert_eq!(summary.truncated, 1);
    assert_eq!(summary.framing_errors, 1);
    assert_eq!(summary.missing, 0);
    assert_eq!(summary.apids[&common::APID].count, 5);
}

#[test]
fn filter_by_structure() {
    let (tmpdir, catalog) = load();
    let path = write_stream(tmpdir.path());
    let filter = PacketFilter {
        structure_ids: [EVENT_SPID].into(),
        ..PacketFilter::default()
    };
    let mut stream = PacketStream::new(&catalog, File::open(path).unwrap()).with_filter(filter);

    let zults: Vec<_> = stream.by_ref().collect();

    assert_eq!(zults.len(), 2);
    assert_eq!(
        zults[0].as_ref().unwrap().header.structure_id,
        Some(EVENT_SPID)
    );
    assert!(matches!(zults[1], Err(DecodeError::Framing(_))));
    assert_eq!(stream.filtered(), 4);
}

#[test]
fn parallel_matches_sequential() {
    let (tmpdir, catalog) = load();
    let path = write_stream(tmpdir.path());

    let sequential: Vec<_> = PacketStream::new(&catalog, File::open(&path).unwrap())
        .map(|zult| zult.ok())
        .collect();

    let decoder = ParallelDecoder::builder()
        .catalog(Arc::new(catalog))
        .num_threads(3)
        .build();
    let packets = PacketReaderIter::new(File::open(&path).unwrap());
    let mut iter = decoder.decode(packets).unwrap();
    let parallel: Vec<_> = iter.by_ref().map(|zult| zult.ok()).collect();

    assert_eq!(parallel, sequential);
    assert_eq!(iter.summary().count, 5);
    assert_eq!(iter.summary().truncated, 1);
}

#[cfg(feature = "serde")]
#[test]
fn json_output() {
    let (_tmpdir, catalog) = load();
    let decoder = PacketDecoder::new(&catalog);
    let packet = decoder
        .decode(&hk_packet(0, 700, 1, &[-3, 10], Some(100)))
        .unwrap();

    let value = serde_json::to_value(&packet).unwrap();

    assert_eq!(value["parameters"][0]["name"], "TEMP");
    assert_eq!(value["parameters"][0]["eng_value"]["number"], 300.0);
    assert_eq!(value["parameters"][1]["eng_value"]["label"], "NOMINAL");
    assert!(value.get("raw").is_none());
}
