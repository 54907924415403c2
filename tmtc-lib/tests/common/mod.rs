#![allow(dead_code)]
use std::path::{Path, PathBuf};

use rusqlite::Connection;

pub const APID: u16 = 42;
pub const HK_SPID: u32 = 54101;
pub const EVENT_SPID: u32 = 54102;

const SCHEMA: &str = "
    CREATE TABLE meta(key TEXT PRIMARY KEY, value TEXT NOT NULL);
    CREATE TABLE structures(spid INTEGER PRIMARY KEY, name TEXT NOT NULL, description TEXT);
    CREATE TABLE fields(id INTEGER PRIMARY KEY, spid INTEGER NOT NULL, parent INTEGER,
        position INTEGER NOT NULL, name TEXT NOT NULL, kind TEXT NOT NULL,
        bit_width INTEGER NOT NULL DEFAULT 0, signed INTEGER NOT NULL DEFAULT 0,
        calibration TEXT, counter TEXT, discriminator TEXT, discriminator_value INTEGER);
    CREATE TABLE calibrations(ref TEXT PRIMARY KEY, kind TEXT NOT NULL, a REAL, b REAL,
        description TEXT);
    CREATE TABLE calibration_points(ref TEXT NOT NULL, raw INTEGER NOT NULL, eng REAL,
        label TEXT);
    CREATE TABLE parameters(name TEXT PRIMARY KEY, description TEXT, unit TEXT);
    CREATE TABLE secondary_headers(packet_type TEXT NOT NULL, position INTEGER NOT NULL,
        name TEXT NOT NULL, role TEXT NOT NULL, bit_width INTEGER NOT NULL);
    CREATE TABLE packet_types(packet_type TEXT NOT NULL, service_type INTEGER NOT NULL,
        service_subtype INTEGER NOT NULL, sub_type INTEGER, spid INTEGER NOT NULL,
        name TEXT, description TEXT);
";

const CONTENT: &str = "
    INSERT INTO meta VALUES ('schema_version', '1'), ('mission', 'TEST');

    INSERT INTO secondary_headers VALUES
        ('TM', 0, 'pus_version', 'spare', 8),
        ('TM', 1, 'service_type', 'service_type', 8),
        ('TM', 2, 'service_subtype', 'service_subtype', 8),
        ('TM', 3, 'destination', 'other', 8),
        ('TM', 4, 'coarse_time', 'coarse_time', 32),
        ('TM', 5, 'fine_time', 'fine_time', 16);

    INSERT INTO packet_types VALUES
        ('TM', 3, 25, NULL, 54101, 'HK_REPORT', 'Periodic housekeeping report'),
        ('TM', 5, 1, NULL, 54102, 'EVENT_REPORT', 'Informative event');

    INSERT INTO structures VALUES
        (54101, 'HK', 'Housekeeping parameters'),
        (54102, 'EVENT', NULL);

    INSERT INTO fields(id, spid, parent, position, name, kind, bit_width, signed,
                       calibration, counter, discriminator, discriminator_value) VALUES
        (1, 54101, NULL, 0, 'TEMP', 'scalar', 12, 0, 'TEMP_CAL', NULL, NULL, NULL),
        (2, 54101, NULL, 1, 'MODE', 'scalar', 4, 0, 'MODE_ENUM', NULL, NULL, NULL),
        (3, 54101, NULL, 2, 'N', 'counter', 8, 0, NULL, NULL, NULL, NULL),
        (4, 54101, NULL, 3, 'SAMPLES', 'repeat', 0, 0, NULL, 'N', NULL, NULL),
        (5, 54101, 4, 0, 'V', 'scalar', 16, 1, 'V_POLY', NULL, NULL, NULL),
        (6, 54101, NULL, 4, 'NOMINAL_ONLY', 'conditional', 0, 0, NULL, NULL, 'MODE', 1),
        (7, 54101, 6, 0, 'EXTRA', 'scalar', 8, 0, 'EXTRA_CURVE', NULL, NULL, NULL),
        (8, 54102, NULL, 0, 'EVENT_ID', 'scalar', 16, 0, NULL, NULL, NULL, NULL);

    INSERT INTO calibrations(ref, kind, a, b) VALUES
        ('TEMP_CAL', 'linear', 0.5, -50.0),
        ('MODE_ENUM', 'enum', NULL, NULL),
        ('V_POLY', 'polynomial', NULL, NULL),
        ('EXTRA_CURVE', 'curve', NULL, NULL);

    INSERT INTO calibration_points VALUES
        ('MODE_ENUM', 0, NULL, 'SAFE'),
        ('MODE_ENUM', 1, NULL, 'NOMINAL'),
        ('V_POLY', 0, 1.0, NULL),
        ('V_POLY', 1, 2.0, NULL),
        ('EXTRA_CURVE', 0, 0.0, NULL),
        ('EXTRA_CURVE', 200, 100.0, NULL);

    INSERT INTO parameters VALUES
        ('TEMP', 'Board temperature', 'degC'),
        ('V', 'Bus voltage sample', 'V');
";

/// Write the test catalog into `dir`, returning its path.
pub fn write_catalog(dir: &Path) -> PathBuf {
    write_catalog_with(dir, "")
}

/// Write the test catalog followed by `extra` statements.
pub fn write_catalog_with(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("catalog.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(CONTENT).unwrap();
    conn.execute_batch(extra).unwrap();
    path
}

/// PUS style TM packet for `APID`.
pub fn tm_packet(seq: u16, service: (u8, u8), coarse: u32, body: &[u8]) -> Vec<u8> {
    let len = (10 + body.len() - 1) as u16;
    #[rustfmt::skip]
    let header = [
        0x08 | (APID >> 8) as u8, APID as u8,
        0xc0 | (seq >> 8) as u8, seq as u8,
        (len >> 8) as u8, len as u8,
        0x10, service.0, service.1, 0x00,
    ];
    let mut dat = header.to_vec();
    dat.extend(coarse.to_be_bytes());
    dat.extend([0x80, 0x00]);
    dat.extend_from_slice(body);
    dat
}

/// Body of an `HK` structure. `extra` is only encoded when given.
pub fn hk_body(temp: u16, mode: u8, samples: &[i16], extra: Option<u8>) -> Vec<u8> {
    let mut body = ((temp << 4) | u16::from(mode & 0xf)).to_be_bytes().to_vec();
    body.push(samples.len() as u8);
    for sample in samples {
        body.extend(sample.to_be_bytes());
    }
    body.extend(extra);
    body
}

pub fn hk_packet(seq: u16, temp: u16, mode: u8, samples: &[i16], extra: Option<u8>) -> Vec<u8> {
    tm_packet(seq, (3, 25), 1000, &hk_body(temp, mode, samples, extra))
}
