//! End-to-end invocation tests. The native callees are `extern "C"`
//! functions compiled into this test binary; their addresses stand in for
//! resolved symbols, so no pre-built shared library is needed.

use dynvoke::{Arg, Error, FnAddr, Outcome, TypeInfo, Value, invoke, library};

fn call(f: usize, ret: &TypeInfo, args: Vec<Arg>) -> Outcome {
    invoke(FnAddr::new(f), ret, &args).expect("invocation should succeed")
}

fn scalar(tag: &str, value: Value) -> Arg {
    Arg::new(value, TypeInfo::tag(tag))
}

// ── Scalar pass-through ──────────────────────────────────────────────

macro_rules! echo_fn {
    ($name:ident, $t:ty) => {
        extern "C" fn $name(v: $t) -> $t {
            v
        }
    };
}

echo_fn!(echo_u8, u8);
echo_fn!(echo_u16, u16);
echo_fn!(echo_u32, u32);
echo_fn!(echo_u64, u64);
echo_fn!(echo_s8, i8);
echo_fn!(echo_s16, i16);
echo_fn!(echo_s32, i32);
echo_fn!(echo_s64, i64);
echo_fn!(echo_f32, f32);
echo_fn!(echo_f64, f64);

fn expect_uint(tag: &str, f: usize, v: u64) {
    let out = call(f, &TypeInfo::tag(tag), vec![scalar(tag, Value::UInt(v))]);
    match out.ret {
        Value::UInt(r) => assert_eq!(r, v, "{tag} value {v}"),
        other => panic!("{tag}: expected unsigned return, got {other:?}"),
    }
}

fn expect_int(tag: &str, f: usize, v: i64) {
    let out = call(f, &TypeInfo::tag(tag), vec![scalar(tag, Value::Int(v))]);
    match out.ret {
        Value::Int(r) => assert_eq!(r, v, "{tag} value {v}"),
        other => panic!("{tag}: expected signed return, got {other:?}"),
    }
}

#[test]
fn unsigned_scalars_pass_through_at_boundaries() {
    for v in [0, 1, 0x7f, u8::MAX as u64] {
        expect_uint("u8", echo_u8 as usize, v);
    }
    for v in [0, 1, 0x7fff, u16::MAX as u64] {
        expect_uint("u16", echo_u16 as usize, v);
    }
    for v in [0, 1, 0x7fff_ffff, u32::MAX as u64] {
        expect_uint("u32", echo_u32 as usize, v);
    }
    for v in [0, 1, u64::MAX / 2, u64::MAX] {
        expect_uint("u64", echo_u64 as usize, v);
    }
}

#[test]
fn signed_scalars_pass_through_at_boundaries() {
    for v in [i8::MIN as i64, -1, 0, 42, i8::MAX as i64] {
        expect_int("s8", echo_s8 as usize, v);
    }
    for v in [i16::MIN as i64, -1, 0, 1000, i16::MAX as i64] {
        expect_int("s16", echo_s16 as usize, v);
    }
    for v in [i32::MIN as i64, -1, 0, 123_456, i32::MAX as i64] {
        expect_int("s32", echo_s32 as usize, v);
    }
    for v in [i64::MIN, -1, 0, 1, i64::MAX] {
        expect_int("s64", echo_s64 as usize, v);
    }
}

#[test]
fn floats_pass_through_including_nan_and_signed_zero() {
    for v in [0.0f64, -1.5, 3.25, f64::MAX, f64::MIN] {
        let out = call(
            echo_f64 as usize,
            &TypeInfo::tag("f64"),
            vec![scalar("f64", Value::Float(v))],
        );
        assert!(matches!(out.ret, Value::Float(r) if r == v));
    }

    let out = call(
        echo_f64 as usize,
        &TypeInfo::tag("f64"),
        vec![scalar("f64", Value::Float(f64::NAN))],
    );
    assert!(matches!(out.ret, Value::Float(r) if r.is_nan()));

    let out = call(
        echo_f64 as usize,
        &TypeInfo::tag("f64"),
        vec![scalar("f64", Value::Float(-0.0))],
    );
    assert!(matches!(out.ret, Value::Float(r) if r == 0.0 && r.is_sign_negative()));

    let out = call(
        echo_f32 as usize,
        &TypeInfo::tag("f32"),
        vec![scalar("f32", Value::Float(f64::NAN))],
    );
    assert!(matches!(out.ret, Value::Float(r) if r.is_nan()));

    let out = call(
        echo_f32 as usize,
        &TypeInfo::tag("f32"),
        vec![scalar("f32", Value::Float(-0.0))],
    );
    assert!(matches!(out.ret, Value::Float(r) if r == 0.0 && r.is_sign_negative()));

    let out = call(
        echo_f32 as usize,
        &TypeInfo::tag("f32"),
        vec![scalar("f32", Value::Float(1.25))],
    );
    assert!(matches!(out.ret, Value::Float(r) if r == 1.25));
}

// ── Void and pointer returns ─────────────────────────────────────────

extern "C" fn do_nothing() {}

extern "C" fn give_address() -> *const u8 {
    0x4000 as *const u8
}

#[test]
fn void_return_has_no_value() {
    let out = call(do_nothing as usize, &TypeInfo::tag("void"), vec![]);
    assert!(matches!(out.ret, Value::Void));
    assert!(out.outputs.is_empty());
}

#[test]
fn pointer_return_is_an_opaque_address() {
    let out = call(give_address as usize, &TypeInfo::tag("c_ptr"), vec![]);
    assert!(matches!(out.ret, Value::Ptr(0x4000)));
}

// ── Struct round trips ───────────────────────────────────────────────

#[repr(C)]
#[derive(Clone, Copy)]
struct PairU8U16 {
    a: u8,
    b: u16,
}

extern "C" fn create_pair() -> PairU8U16 {
    PairU8U16 { a: b'a', b: 43008 }
}

extern "C" fn receive_pair(p: PairU8U16) -> u32 {
    (p.a == b'a' && p.b == 43008) as u32
}

fn pair_info() -> TypeInfo {
    TypeInfo::struct_of("t_pair_u8_u16", vec![TypeInfo::tag("u8"), TypeInfo::tag("u16")])
}

#[test]
fn struct_create_then_receive_round_trips() {
    let created = call(create_pair as usize, &pair_info(), vec![]);
    let boxed = match created.ret {
        Value::Struct(sv) => sv,
        other => panic!("expected boxed struct, got {other:?}"),
    };
    assert_eq!(boxed.layout.size, 4);
    assert_eq!(boxed.bytes.len(), 4);

    let received = call(
        receive_pair as usize,
        &TypeInfo::tag("u32"),
        vec![Arg::new(Value::Struct(boxed), pair_info())],
    );
    assert!(matches!(received.ret, Value::UInt(1)));
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Mix {
    inner: PairU8U16,
    f: f64,
}

extern "C" fn create_mix() -> Mix {
    Mix {
        inner: PairU8U16 { a: b'a', b: 43008 },
        f: 6.5,
    }
}

extern "C" fn receive_mix(m: Mix) -> u32 {
    (m.inner.a == b'a' && m.inner.b == 43008 && m.f == 6.5) as u32
}

#[test]
fn nested_struct_round_trips() {
    let info = TypeInfo::struct_of(
        "t_mix",
        vec![
            TypeInfo::struct_of(
                "t_mix_inner",
                vec![TypeInfo::tag("u8"), TypeInfo::tag("u16")],
            ),
            TypeInfo::tag("f64"),
        ],
    );
    let created = call(create_mix as usize, &info, vec![]);
    let boxed = match created.ret {
        Value::Struct(sv) => sv,
        other => panic!("expected boxed struct, got {other:?}"),
    };
    let received = call(
        receive_mix as usize,
        &TypeInfo::tag("u32"),
        vec![Arg::new(Value::Struct(boxed), info)],
    );
    assert!(matches!(received.ret, Value::UInt(1)));
}

#[repr(C)]
#[derive(Clone, Copy)]
union Halves {
    one: u8,
    two: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct UnionHolder {
    tag: u16,
    halves: Halves,
}

extern "C" fn receive_union_holder(h: UnionHolder) -> u32 {
    (h.tag == 7 && unsafe { h.halves.two } == 0x8000) as u32
}

#[test]
fn union_passes_as_raw_bytes() {
    // The union is modeled as two raw bytes; the surrounding field keeps
    // the offsets identical to the C layout.
    let info = TypeInfo::struct_of(
        "t_union_holder",
        vec![TypeInfo::tag("u16"), TypeInfo::tag("u8").array(2)],
    );
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&7u16.to_ne_bytes());
    bytes.extend_from_slice(&0x8000u16.to_ne_bytes());
    let out = call(
        receive_union_holder as usize,
        &TypeInfo::tag("u32"),
        vec![Arg::new(Value::Bytes(bytes), info)],
    );
    assert!(matches!(out.ret, Value::UInt(1)));
}

#[repr(C)]
struct Matrix {
    cells: [u32; 256],
}

extern "C" fn sum_matrix(m: Matrix) -> u64 {
    m.cells.iter().map(|&c| c as u64).sum()
}

#[test]
fn fixed_size_array_passes_by_value() {
    let mut bytes = Vec::with_capacity(1024);
    for i in 0..256u32 {
        bytes.extend_from_slice(&i.to_ne_bytes());
    }
    let out = call(
        sum_matrix as usize,
        &TypeInfo::tag("u64"),
        vec![Arg::new(Value::Bytes(bytes), TypeInfo::tag("u32").array(256))],
    );
    // 0 + 1 + ... + 255
    assert!(matches!(out.ret, Value::UInt(32640)));
}

#[test]
fn struct_id_reregistration_keeps_the_first_layout() {
    let first = call(
        create_pair as usize,
        &TypeInfo::struct_of(
            "t_memo_contract",
            vec![TypeInfo::tag("u8"), TypeInfo::tag("u16")],
        ),
        vec![],
    );
    // Same id, different field list: the cached layout wins, silently.
    let second = call(
        create_pair as usize,
        &TypeInfo::struct_of(
            "t_memo_contract",
            vec![TypeInfo::tag("u64"), TypeInfo::tag("u64")],
        ),
        vec![],
    );
    match (first.ret, second.ret) {
        (Value::Struct(a), Value::Struct(b)) => {
            assert_eq!(a.layout.size, 4);
            assert_eq!(b.layout.size, 4);
        }
        other => panic!("expected two boxed structs, got {other:?}"),
    }
}

// ── Output parameters ────────────────────────────────────────────────

extern "C" fn bump_u32(p: *mut u32) {
    unsafe { *p += 1 }
}

#[test]
fn by_address_out_echoes_the_mutated_value() {
    let out = call(
        bump_u32 as usize,
        &TypeInfo::tag("void"),
        vec![Arg::new(Value::UInt(41), TypeInfo::tag("u32").by_addr().with_out())],
    );
    assert!(matches!(out.ret, Value::Void));
    assert!(matches!(out.outputs.as_slice(), [Value::UInt(42)]));

    // Marshaling composes: feed the echoed value straight back in.
    let next = call(
        bump_u32 as usize,
        &TypeInfo::tag("void"),
        vec![Arg::new(Value::UInt(42), TypeInfo::tag("u32").by_addr().with_out())],
    );
    assert!(matches!(next.outputs.as_slice(), [Value::UInt(43)]));
}

#[test]
fn by_address_without_out_echoes_nothing() {
    let out = call(
        bump_u32 as usize,
        &TypeInfo::tag("void"),
        vec![Arg::new(Value::UInt(7), TypeInfo::tag("u32").by_addr())],
    );
    assert!(out.outputs.is_empty());
}

// ── Function pointers as arguments ───────────────────────────────────

extern "C" fn add32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn apply2(a: i32, b: i32, f: extern "C" fn(i32, i32) -> i32) -> i32 {
    f(a, b)
}

#[test]
fn function_pointer_argument_is_invoked_by_the_callee() {
    let out = call(
        apply2 as usize,
        &TypeInfo::tag("s32"),
        vec![
            scalar("s32", Value::Int(30)),
            scalar("s32", Value::Int(12)),
            Arg::new(Value::Ptr(add32 as usize as u64), TypeInfo::tag("c_ptr")),
        ],
    );
    assert!(matches!(out.ret, Value::Int(42)));
}

// ── Variadic calls ───────────────────────────────────────────────────

#[cfg(unix)]
#[test]
fn variadic_region_flattens_into_a_real_call() {
    let mut buf = vec![0u8; 64];
    let fmt = b"%d+%d=%d\0".to_vec();
    let out = call(
        libc::snprintf as usize,
        &TypeInfo::tag("s32"),
        vec![
            Arg::new(Value::Ptr(buf.as_mut_ptr() as u64), TypeInfo::tag("c_ptr")),
            Arg::new(Value::UInt(64), TypeInfo::tag("u64")),
            Arg::new(Value::Bytes(fmt), TypeInfo::tag("c_ptr")),
            Arg::new(
                Value::VaArgs(vec![
                    scalar("s32", Value::Int(1)),
                    scalar("s32", Value::Int(2)),
                    scalar("s32", Value::Int(3)),
                ]),
                TypeInfo::va_args(),
            ),
        ],
    );
    assert!(matches!(out.ret, Value::Int(5)));
    let written = &buf[..5];
    assert_eq!(written, b"1+2=3");
}

#[test]
fn va_args_anywhere_but_last_fails_to_build() {
    let err = invoke(
        FnAddr::new(do_nothing as usize),
        &TypeInfo::tag("void"),
        &[
            Arg::new(Value::VaArgs(vec![]), TypeInfo::va_args()),
            scalar("u32", Value::UInt(1)),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, Error::Build { index: 0, .. }));
}

// ── Fault containment ────────────────────────────────────────────────

extern "C" fn read_u64_at(p: *const u64) -> u64 {
    unsafe { std::ptr::read_volatile(p) }
}

#[cfg(unix)]
#[test]
fn mismatched_descriptor_faults_are_contained() {
    // Deliberately hand the callee an unmapped address.
    let err = invoke(
        FnAddr::new(read_u64_at as usize),
        &TypeInfo::tag("u64"),
        &[Arg::new(Value::Ptr(0x10), TypeInfo::tag("c_ptr"))],
    )
    .unwrap_err();
    match err {
        Error::Invoke(message) => assert_eq!(message, "segmentation fault"),
        other => panic!("expected a contained fault, got {other:?}"),
    }

    // The process survived; a well-formed invocation still works.
    let out = call(
        echo_u32 as usize,
        &TypeInfo::tag("u32"),
        vec![scalar("u32", Value::UInt(99))],
    );
    assert!(matches!(out.ret, Value::UInt(99)));
}

// ── Resolution through the library collaborator ──────────────────────

#[cfg(unix)]
#[test]
fn resolved_libc_symbol_is_invocable() {
    let addr = library::resolve(library::SELF_PATH, "strlen").unwrap();
    let out = call(
        addr.raw(),
        &TypeInfo::tag("u64"),
        vec![Arg::new(Value::Bytes(b"hello\0".to_vec()), TypeInfo::tag("c_ptr"))],
    );
    assert!(matches!(out.ret, Value::UInt(5)));
}
