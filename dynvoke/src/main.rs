//! Command-line front end: resolve a symbol and invoke it from argument
//! descriptions given as `TAG=VALUE` pairs.

use clap::Parser;

use dynvoke::{Arg, FnAddr, TypeInfo, Value, invoke, library};

#[derive(Parser)]
#[command(name = "dynvoke", about = "Invoke a native function described at run time")]
struct Cli {
    /// Shared library path, or RTLD_SELF for the running process.
    library: String,
    /// Symbol name to resolve and call.
    symbol: String,
    /// Return type tag (u8..u64, s8..s64, f32, f64, c_ptr, void).
    #[arg(long, default_value = "void")]
    ret: String,
    /// Argument as TAG=VALUE; repeatable, in call order. Flags may follow
    /// the tag: `u32+addr+out=7`. `str=text` passes a NUL-terminated buffer
    /// as c_ptr.
    #[arg(long = "arg")]
    args: Vec<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let addr = match library::resolve(&cli.library, &cli.symbol) {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let args = match cli.args.iter().map(|s| parse_arg(s)).collect::<Result<Vec<_>, _>>() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    match invoke(addr, &TypeInfo::tag(cli.ret.as_str()), &args) {
        Ok(outcome) => print_outcome(addr, &outcome.ret, &outcome.outputs),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn parse_arg(spec: &str) -> Result<Arg, String> {
    let (desc, raw) = spec
        .split_once('=')
        .ok_or_else(|| format!("argument '{spec}' is not TAG=VALUE"))?;

    let mut parts = desc.split('+');
    let tag = parts.next().unwrap_or_default();
    let mut info = match tag {
        "str" => TypeInfo::tag("c_ptr"),
        other => TypeInfo::tag(other),
    };
    for flag in parts {
        match flag {
            "addr" => info = info.by_addr(),
            "out" => info = info.with_out(),
            "ref" => info = info.by_ref(),
            other => return Err(format!("unknown flag '{other}' in '{spec}'")),
        }
    }

    let value = match tag {
        "str" => {
            let mut bytes = raw.as_bytes().to_vec();
            bytes.push(0);
            Value::Bytes(bytes)
        }
        "f32" | "f64" => Value::Float(
            raw.parse::<f64>()
                .map_err(|e| format!("bad float '{raw}': {e}"))?,
        ),
        "c_ptr" if raw == "null" => Value::Null,
        "c_ptr" => Value::Ptr(parse_u64(raw)?),
        "s8" | "s16" | "s32" | "s64" => Value::Int(
            raw.parse::<i64>()
                .map_err(|e| format!("bad integer '{raw}': {e}"))?,
        ),
        _ => Value::UInt(parse_u64(raw)?),
    };

    Ok(Arg::new(value, info))
}

fn parse_u64(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    };
    parsed.map_err(|e| format!("bad number '{raw}': {e}"))
}

fn print_outcome(addr: FnAddr, ret: &Value, outputs: &[Value]) {
    match ret {
        Value::Void => println!("{:#x} returned", addr.raw()),
        other => println!("{:#x} returned {other:?}", addr.raw()),
    }
    for (i, out) in outputs.iter().enumerate() {
        println!("out[{i}] = {out:?}");
    }
}
