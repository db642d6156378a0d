///
/// # Integration Tests for Composite Rows
///
/// Builds rows of user-defined composite types through `PgTuple::build`
/// and decodes them again through `PgTuple::from_datum`, against the
/// in-process backend. Covers null patterns, descriptor reference
/// counting, rebinding and the aborts raised for contract violations.
///

use pgext_runtime::pgext_core::{Datum, DatumRepr, Oid, Toast, TUPDESC_NOT_REFCOUNTED};
use pgext_runtime::pgext_tuple::PgTuple;
use pgext_runtime::{Backend, HostConfig};

fn performance_stats(host: &Backend) -> Oid {
    host.create_composite_type(
        "performance_stats",
        &[
            ("name", "text"),
            ("calls", "int8"),
            ("mean_ms", "double precision"),
            ("active", "bool"),
        ],
    )
    .expect("Failed to create composite type")
}

#[test]
fn test_build_then_decode_every_null_pattern() {
    let host = Backend::in_memory().unwrap();
    performance_stats(&host);

    for mask in 0u8..16 {
        let pick = |i: u8, d: Datum| if mask & (1 << i) == 0 { Some(d) } else { None };
        let name = "fetch_user".to_string().to_datum(&host);
        let datum = PgTuple::build(
            &host,
            "performance_stats",
            [
                pick(0, name),
                pick(1, Datum::from_i64(42)),
                pick(2, Datum::from_f64(1.25)),
                pick(3, Datum::from_bool(true)),
            ],
        )
        .into_datum();

        let row = PgTuple::from_datum(&host, datum).expect("row should decode");
        assert_eq!(row.natts(), 4);
        for attnum in 1..=4 {
            let is_null = mask & (1 << (attnum - 1)) != 0;
            assert_eq!(row.get(attnum).is_none(), is_null, "mask {mask:04b} attribute {attnum}");
        }
        if mask & 1 == 0 {
            assert_eq!(row.get_as::<String>(1).as_deref(), Some("fetch_user"));
        }
        if mask & 2 == 0 {
            assert_eq!(row.get_as::<i64>(2), Some(42));
        }
        if mask & 4 == 0 {
            assert_eq!(row.get_as::<f64>(3), Some(1.25));
        }
        if mask & 8 == 0 {
            assert_eq!(row.get_as::<bool>(4), Some(true));
        }
    }
}

#[test]
fn test_values_matches_get() {
    let host = Backend::in_memory().unwrap();
    performance_stats(&host);
    let datum = PgTuple::build(
        &host,
        "performance_stats",
        [None, Some(Datum::from_i64(-7)), None, Some(Datum::from_bool(false))],
    )
    .into_datum();

    let row = PgTuple::from_datum(&host, datum).unwrap();
    let values = row.values::<4>();
    assert!(values[0].is_none());
    assert_eq!(values[1].map(Datum::as_i64), Some(-7));
    assert!(values[2].is_none());
    assert_eq!(values[3].map(Datum::as_bool), Some(false));
    for (i, value) in values.iter().enumerate() {
        assert_eq!(*value, row.get(i as i32 + 1));
    }
}

#[test]
fn test_fixed_width_types_round_trip_exactly() {
    let host = Backend::in_memory().unwrap();
    host.create_enum_type("mood", &["sad", "ok", "happy"]).unwrap();
    host.create_composite_type(
        "scalars",
        &[
            ("b", "bool"),
            ("c", "char"),
            ("s", "int2"),
            ("i", "int4"),
            ("l", "int8"),
            ("o", "oid"),
            ("r", "float4"),
            ("d", "float8"),
            ("ts", "timestamp"),
            ("tz", "timestamptz"),
            ("m", "mood"),
        ],
    )
    .unwrap();
    let happy = host.enum_value("mood", "happy").unwrap();

    let rows: [[Datum; 11]; 3] = [
        [
            Datum::from_bool(false),
            Datum::from_i8(i8::MIN),
            Datum::from_i16(i16::MIN),
            Datum::from_i32(i32::MIN),
            Datum::from_i64(i64::MIN),
            Datum::from_u32(0),
            Datum::from_f32(f32::MIN),
            Datum::from_f64(f64::MIN),
            Datum::from_i64(-1),
            Datum::from_i64(i64::MIN),
            Datum::from_u32(happy),
        ],
        [
            Datum::from_bool(true),
            Datum::from_i8(-1),
            Datum::from_i16(-1),
            Datum::from_i32(-1),
            Datum::from_i64(-1),
            Datum::from_u32(u32::MAX),
            Datum::from_f32(-1.5),
            Datum::from_f64(-0.0),
            Datum::from_i64(0),
            Datum::from_i64(-86_400_000_000),
            Datum::from_u32(happy),
        ],
        [
            Datum::from_bool(true),
            Datum::from_i8(i8::MAX),
            Datum::from_i16(i16::MAX),
            Datum::from_i32(i32::MAX),
            Datum::from_i64(i64::MAX),
            Datum::from_u32(0x8000_0000),
            Datum::from_f32(f32::NEG_INFINITY),
            Datum::from_f64(f64::MAX),
            Datum::from_i64(i64::MAX),
            Datum::from_i64(1),
            Datum::from_u32(happy),
        ],
    ];

    for values in rows {
        let datum = PgTuple::build(&host, "scalars", values.map(Some)).into_datum();
        let row = PgTuple::from_datum(&host, datum).unwrap();
        assert_eq!(row.values::<11>(), values.map(Some));
        assert_eq!(row.get_as::<i16>(3), Some(values[2].as_i16()));
        assert_eq!(row.get_as::<f32>(7).map(f32::to_bits), Some(values[6].as_f32().to_bits()));
    }
}

#[test]
fn test_descriptor_released_once_per_view() {
    let host = Backend::in_memory().unwrap();
    let oid = performance_stats(&host);
    assert_eq!(host.tupdesc_refcount(oid), Some(1));

    let datum = PgTuple::build(&host, "performance_stats", [None; 4]).into_datum();
    assert_eq!(host.tupdesc_refcount(oid), Some(1));

    let first = PgTuple::from_datum(&host, datum).unwrap();
    assert_eq!(host.tupdesc_refcount(oid), Some(2));
    let second = PgTuple::from_datum(&host, datum).unwrap();
    assert_eq!(host.tupdesc_refcount(oid), Some(3));
    drop(second);
    assert_eq!(host.tupdesc_refcount(oid), Some(2));
    drop(first);
    assert_eq!(host.tupdesc_refcount(oid), Some(1));

    let stats = host.stats();
    assert_eq!(stats.tupdesc_lookups, 3);
    assert_eq!(stats.tupdesc_releases, 3);
}

#[test]
fn test_static_descriptor_never_released() {
    let host = Backend::in_memory().unwrap();
    let oid = host
        .create_static_composite_type("point2", &[("x", "int4"), ("y", "int4")])
        .unwrap();

    let datum = PgTuple::build(&host, "point2", [Some(Datum::from_i32(3)), Some(Datum::from_i32(-4))]).into_datum();
    let row = PgTuple::from_datum(&host, datum).unwrap();
    assert_eq!(row.get_as::<i32>(2), Some(-4));
    drop(row);

    assert_eq!(host.tupdesc_refcount(oid), Some(TUPDESC_NOT_REFCOUNTED));
    assert_eq!(host.stats().tupdesc_releases, 0);
}

#[test]
fn test_rebind_reuses_descriptor() {
    let host = Backend::in_memory().unwrap();
    performance_stats(&host);
    let make = |calls: i64| {
        PgTuple::build(
            &host,
            "performance_stats",
            [None, Some(Datum::from_i64(calls)), None, None],
        )
        .into_datum()
    };
    let rows: Vec<Datum> = (1..=5).map(make).collect();

    let mut view = PgTuple::from_datum(&host, rows[0]).unwrap();
    let lookups = host.stats().tupdesc_lookups;
    let mut seen = Vec::new();
    for datum in &rows {
        view.rebind(*datum);
        seen.push(view.get_as::<i64>(2).unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(host.stats().tupdesc_lookups, lookups);

    // A datum the host cannot materialize leaves the current row in place.
    view.rebind(Datum::from_i64(17));
    assert_eq!(view.get_as::<i64>(2), Some(5));
}

#[test]
fn test_large_text_attribute_round_trips() {
    let host = Backend::new(
        HostConfig::from_toml_str("[toast]\ncompression = \"none\"\nexternal_threshold = 128").unwrap(),
    )
    .unwrap();
    host.create_composite_type("note", &[("id", "int4"), ("body", "text")])
        .unwrap();

    let body = "lorem ipsum dolor sit amet ".repeat(200);
    let stored = host.toast_datum(body.as_bytes());
    let datum = PgTuple::build(&host, "note", [Some(Datum::from_i32(1)), Some(stored)]).into_datum();

    let row = PgTuple::from_datum(&host, datum).unwrap();
    assert!(!row.tuple().has_external());
    assert_eq!(row.get_as::<String>(2), Some(body));
    assert!(host.stats().toasted_external >= 1);
}

#[test]
fn test_unmaterializable_row_is_none() {
    let host = Backend::in_memory().unwrap();
    assert!(PgTuple::from_datum(&host, Datum::from_i64(99)).is_none());

    let tiny = host.cstring_to_text_with_len(b"abc");
    assert!(PgTuple::from_datum(&host, tiny).is_none());
}

#[test]
fn test_contract_violations_abort_the_call() {
    let host = Backend::in_memory().unwrap();
    performance_stats(&host);

    let err = host
        .call(&[], |_, host| {
            PgTuple::build(host, "performance_stats", [Some(Datum::from_i64(1))]).into_datum()
        })
        .unwrap_err();
    assert!(err.message().contains("declared arity 1"));

    let err = host
        .call(&[], |_, host| PgTuple::build(host, "no_such_type", [None; 2]).into_datum())
        .unwrap_err();
    assert_eq!(err.message(), "type \"no_such_type\" does not exist");

    let datum = PgTuple::build(&host, "performance_stats", [None; 4]).into_datum();
    let err = host
        .call(&[Some(datum)], |fcinfo, host| {
            let row = PgTuple::from_datum(host, fcinfo.get_arg(0).unwrap_or_default())?;
            row.get(5)
        })
        .unwrap_err();
    assert!(err.message().contains("column 5 out of range"));

    // Aborted views still release their descriptor while unwinding.
    let stats = host.stats();
    assert_eq!(stats.tupdesc_lookups, stats.tupdesc_releases);
}
