use lmcheck::*;

fn get_crate_root() -> Result<PathBuf, std::env::VarError> {
    Ok(PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?))
}

fn data_path(p: &str) -> PathBuf {
    let mut path = get_crate_root().unwrap();
    path.push(p);
    path
}

#[test]
fn parses_every_operation() {
    let record = parse_line("malloc 64 0x1000 0x400123 0x400456").unwrap();
    assert_eq!(record.call, Call::Malloc { size: 64, result: 0x1000 });
    assert_eq!(record.frames, vec![0x400123, 0x400456]);

    let record = parse_line("calloc 4 16 0x2000 0x400123").unwrap();
    assert_eq!(record.call, Call::Calloc { nobj: 4, size: 16, result: 0x2000 });

    let record = parse_line("realloc 0x1000 128 0x3000 0x400123").unwrap();
    assert_eq!(record.call, Call::Realloc { old: 0x1000, size: 128, result: 0x3000 });

    let record = parse_line("free 0x3000 0x400123").unwrap();
    assert_eq!(record.call, Call::Free { target: 0x3000 });
    assert_eq!(record.call.op(), Op::Free);
}

#[test]
fn null_addresses_are_zero() {
    assert_eq!(parse_line("free (nil) 0x400123").unwrap().call, Call::Free { target: 0 });
    assert_eq!(
        parse_line("realloc (nil) 32 0x5000").unwrap().call,
        Call::Realloc { old: 0, size: 32, result: 0x5000 }
    );
    // Failed allocation, and a stack the unwinder could not walk.
    let record = parse_line("malloc 18446744073709551615 (nil)").unwrap();
    assert_eq!(record.call, Call::Malloc { size: usize::MAX, result: 0 });
    assert!(record.frames.is_empty());
}

#[test]
fn garbage_is_rejected() {
    assert_eq!(parse_line(""), Err(ParseError::Empty));
    assert_eq!(parse_line("mmap 4096 0x1000"), Err(ParseError::UnknownOp("mmap".into())));
    assert_eq!(
        parse_line("calloc 4 0x2000"),
        Err(ParseError::MissingFields { op: Op::Calloc, expected: 3, found: 2 })
    );
    assert_eq!(
        parse_line("malloc big 0x1000"),
        Err(ParseError::BadField { what: "size", token: "big".into() })
    );
    assert_eq!(
        parse_line("free 4096 0x400123"),
        Err(ParseError::BadField { what: "address", token: "4096".into() })
    );
}

#[test]
fn signed_numbers_are_rejected() {
    assert_eq!(
        parse_line("malloc +64 0x1000"),
        Err(ParseError::BadField { what: "size", token: "+64".into() })
    );
    assert_eq!(
        parse_line("malloc -1 0x1000"),
        Err(ParseError::BadField { what: "size", token: "-1".into() })
    );
    assert_eq!(
        parse_line("free 0x+10"),
        Err(ParseError::BadField { what: "address", token: "0x+10".into() })
    );
    assert_eq!(
        parse_line("free 0x10 0x"),
        Err(ParseError::BadField { what: "frame", token: "0x".into() })
    );
}

#[test]
fn interleaved_lines_are_caught() {
    let line = "malloc 24 0x10 0x7f3a1c2b4amalloc 24 0x20 0x7f3a1c2b4a1e";
    assert_eq!(
        parse_line(line),
        Err(ParseError::BadField { what: "frame", token: "0x7f3a1c2b4amalloc".into() })
    );
}

#[test]
fn frame_count_is_bounded() {
    let mut line = String::from("free 0x10");
    for frame in 0..=MAX_FRAMES {
        line.push_str(&format!(" {:#x}", 0x400000 + frame));
    }
    assert_eq!(parse_line(&line), Err(ParseError::TooManyFrames(MAX_FRAMES + 1)));
}

#[test]
fn sample_trace_report() {
    let report = check_file(&data_path("tests/data/sample.trace")).unwrap();
    assert_eq!(report.lines, 9);
    assert_eq!(report.well_formed(), 7);
    let counts: Vec<(Op, usize)> = report.counts.iter().map(|(op, n)| (*op, *n)).collect();
    assert_eq!(counts, vec![(Op::Malloc, 2), (Op::Calloc, 1), (Op::Realloc, 1), (Op::Free, 3)]);
    let bad_lines: Vec<usize> = report.malformed.iter().map(|m| m.line_no).collect();
    assert_eq!(bad_lines, vec![7, 8]);
    assert!(!report.is_clean());
}

#[test]
fn records_reach_the_callback_in_order() {
    let trace = "malloc 8 0x10 0x1\nfree 0x10 0x2\n";
    let mut seen = Vec::new();
    let report = check_with(trace.as_bytes(), |record| {
        seen.push(record.clone());
        Ok(())
    })
    .unwrap();
    assert!(report.is_clean());
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1], Record { call: Call::Free { target: 0x10 }, frames: vec![0x2] });
}

#[test]
fn json_export_is_flat() {
    let record = parse_line("calloc 4 16 0x2000 0x400123").unwrap();
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "op": "calloc",
            "nobj": 4,
            "size": 16,
            "result": 0x2000,
            "frames": [0x400123],
        })
    );
}
