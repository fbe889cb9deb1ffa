use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::diagnostics::RuntimeError;
use crate::module::{Callable, Module, ModuleRef, NativeFunction};
use crate::runtime::Stackframe;
use crate::value::Value;

type NativeResult = Result<Value, RuntimeError>;

/// Builds the `std` module tree: the base functions plus the `list`,
/// `map`, `string`, and `math` submodules. Every non-stdlib module gets
/// this tree under its `std` import.
pub fn install() -> ModuleRef {
    let mut list = Module::bare("list");
    list.functions.insert("push".into(), native("push", list_push));
    list.functions.insert("pop".into(), native("pop", list_pop));

    let mut map = Module::bare("map");
    map.functions.insert("remove".into(), native("remove", map_remove));
    map.functions.insert("keys".into(), native("keys", map_keys));
    map.functions.insert("values".into(), native("values", map_values));
    map.functions.insert("contains".into(), native("contains", map_contains));

    let mut string = Module::bare("string");
    string.functions.insert("substring".into(), native("substring", string_substring));
    string.functions.insert("find".into(), native("find", string_find));
    string.functions.insert("upper".into(), native("upper", string_upper));
    string.functions.insert("lower".into(), native("lower", string_lower));
    string.functions.insert("byte".into(), native("byte", string_byte));
    string.functions.insert("char".into(), native("char", string_char));

    let mut math = Module::bare("math");
    math.globals.insert("pi".into(), Value::Number(std::f64::consts::PI));
    math.globals.insert("e".into(), Value::Number(std::f64::consts::E));
    math.functions.insert("pow".into(), native("pow", math_pow));
    math.functions.insert("log".into(), native("log", math_log));
    math.functions.insert("sin".into(), native("sin", math_sin));
    math.functions.insert("cos".into(), native("cos", math_cos));
    math.functions.insert("tan".into(), native("tan", math_tan));
    math.functions.insert("asin".into(), native("asin", math_asin));
    math.functions.insert("acos".into(), native("acos", math_acos));
    math.functions.insert("atan".into(), native("atan", math_atan));
    math.functions.insert("signum".into(), native("signum", math_signum));
    math.functions.insert("abs".into(), native("abs", math_abs));
    math.functions.insert("floor".into(), native("floor", math_floor));
    math.functions.insert("as_int".into(), native("as_int", math_as_int));
    math.functions.insert("rand".into(), native("rand", math_rand));
    math.functions.insert("parse".into(), native("parse", math_parse));

    let mut std_module = Module::bare("std");
    std_module.functions.insert("print".into(), native("print", base_print));
    std_module.functions.insert("println".into(), native("println", base_println));
    std_module.functions.insert("input".into(), native("input", base_input));
    std_module.functions.insert("typeof".into(), native("typeof", base_typeof));
    std_module.functions.insert("crash".into(), native("crash", base_crash));
    std_module.functions.insert("length".into(), native("length", base_length));
    std_module.imported.insert("list".into(), Rc::new(RefCell::new(list)));
    std_module.imported.insert("map".into(), Rc::new(RefCell::new(map)));
    std_module.imported.insert("string".into(), Rc::new(RefCell::new(string)));
    std_module.imported.insert("math".into(), Rc::new(RefCell::new(math)));

    Rc::new(RefCell::new(std_module))
}

fn native(
    name: &'static str,
    callback: fn(&Stackframe, &mut Vec<Value>) -> NativeResult,
) -> Callable {
    Callable::Native(NativeFunction { name, callback })
}

fn expect_argc(frame: &Stackframe, args: &[Value], count: usize) -> Result<(), RuntimeError> {
    if args.len() < count {
        return Err(frame.error(format!(
            "not enough arguments (expected at least {count})"
        )));
    }
    Ok(())
}

fn expect_integer(frame: &Stackframe, value: &Value) -> Result<i64, RuntimeError> {
    value.as_integer().ok_or_else(|| {
        frame.error(format!(
            "could not convert value to integer: {}",
            value.raw_string()
        ))
    })
}

fn expect_number(frame: &Stackframe, value: &Value) -> Result<f64, RuntimeError> {
    value.as_number().ok_or_else(|| {
        frame.error(format!(
            "could not convert value to number: {}",
            value.raw_string()
        ))
    })
}

// Base

fn base_print(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    write_stdout(frame, &args[0].to_text())?;
    Ok(Value::Null)
}

fn base_println(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let mut bytes = args[0].to_text();
    bytes.push(b'\n');
    write_stdout(frame, &bytes)?;
    Ok(Value::Null)
}

fn write_stdout(frame: &Stackframe, bytes: &[u8]) -> Result<(), RuntimeError> {
    let mut stdout = io::stdout();
    stdout
        .write_all(bytes)
        .and_then(|_| stdout.flush())
        .map_err(|err| frame.error(format!("failed to write to stdout: {err}")))
}

fn base_input(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let kind = args[0].to_text();
    let mut line = String::new();
    let read = io::stdin()
        .read_line(&mut line)
        .map_err(|err| frame.error(format!("failed to read input: {err}")))?;
    if read == 0 {
        return Err(frame.error("failed to read input"));
    }
    let line = line.trim_end_matches(['\n', '\r']);
    match kind.as_slice() {
        b"number" => line
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| frame.error("could not parse user input as number")),
        b"integer" => line
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| frame.error("could not parse user input as integer")),
        b"boolean" => match line.trim() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(frame.error("could not parse user input as boolean")),
        },
        b"string" => Ok(Value::string(line)),
        _ => Err(frame.error(format!(
            "cannot get input for type {}",
            args[0].raw_string()
        ))),
    }
}

fn base_typeof(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::string(args[0].type_name()))
}

fn base_crash(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let message = String::from_utf8_lossy(&args[0].to_text()).into_owned();
    Err(frame.error(message))
}

fn base_length(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let length = match &args[0] {
        Value::List(list) => list.borrow().len(),
        Value::String(text) => text.len(),
        Value::Map(map) => map.borrow().len(),
        other => {
            return Err(frame.error(format!(
                "cannot get length of value: {}",
                other.raw_string()
            )));
        }
    };
    Ok(Value::Integer(length as i64))
}

// list

fn list_push(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 2)?;
    let Value::List(list) = &args[0] else {
        return Err(frame.error(format!(
            "cannot push to non-list: {}",
            args[0].raw_string()
        )));
    };
    list.borrow_mut().push(args[1].clone());
    Ok(Value::Null)
}

fn list_pop(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let Value::List(list) = &args[0] else {
        return Err(frame.error(format!(
            "cannot pop from non-list: {}",
            args[0].raw_string()
        )));
    };
    let popped = list.borrow_mut().pop();
    popped.ok_or_else(|| frame.error("cannot pop from empty list"))
}

// map

fn map_remove(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 2)?;
    let Value::Map(map) = &args[0] else {
        return Err(frame.error(format!(
            "cannot remove from non-map: {}",
            args[0].raw_string()
        )));
    };
    let key = args[1].to_text();
    let removed = map.borrow_mut().shift_remove(&key);
    removed.ok_or_else(|| {
        frame.error(format!(
            "key does not exist in map: {}",
            String::from_utf8_lossy(&key)
        ))
    })
}

fn map_keys(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let Value::Map(map) = &args[0] else {
        return Err(frame.error(format!(
            "cannot get keys of non-map: {}",
            args[0].raw_string()
        )));
    };
    let keys = map
        .borrow()
        .keys()
        .map(|key| Value::String(key.clone()))
        .collect();
    Ok(Value::list(keys))
}

fn map_values(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let Value::Map(map) = &args[0] else {
        return Err(frame.error(format!(
            "cannot get values of non-map: {}",
            args[0].raw_string()
        )));
    };
    let values = map.borrow().values().cloned().collect();
    Ok(Value::list(values))
}

fn map_contains(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 2)?;
    let Value::Map(map) = &args[0] else {
        return Err(frame.error(format!(
            "cannot find value in non-map: {}",
            args[0].raw_string()
        )));
    };
    let key = args[1].to_text();
    let contains = map.borrow().contains_key(&key);
    Ok(Value::Boolean(contains))
}

// string

fn string_substring(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 3)?;
    let haystack = args[0].to_text();
    let start = expect_integer(frame, &args[1])?;
    // The third argument acts as a length, not an end index.
    let end = expect_integer(frame, &args[2])?;
    if start > end {
        return Err(frame.error("substring start cannot be greater than end"));
    }
    if start < 0 || start as usize > haystack.len() {
        return Err(frame.error("substring start out of bounds"));
    }
    if end < 0 || end as usize > haystack.len() {
        return Err(frame.error("substring end out of bounds"));
    }
    let start = start as usize;
    let count = (end as usize).min(haystack.len() - start);
    Ok(Value::String(haystack[start..start + count].to_vec()))
}

fn string_find(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 2)?;
    let haystack = args[0].to_text();
    let needle = args[1].to_text();
    let index = match args.get(2) {
        Some(value) => expect_integer(frame, value)?,
        None => 0,
    };
    if needle.len() as i64 + index > haystack.len() as i64 {
        return Ok(Value::Integer(-1));
    }
    // Equal lengths short-circuit to an equality check, reporting 1.
    if needle.len() == haystack.len() {
        return Ok(Value::Integer((haystack == needle) as i64));
    }
    if index < 0 {
        return Ok(Value::Integer(-1));
    }
    let start = index as usize;
    if needle.is_empty() {
        return Ok(Value::Integer(index));
    }
    let found = haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle.as_slice());
    match found {
        Some(offset) => Ok(Value::Integer((start + offset) as i64)),
        None => Ok(Value::Integer(-1)),
    }
}

fn string_upper(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::String(args[0].to_text().to_ascii_uppercase()))
}

fn string_lower(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::String(args[0].to_text().to_ascii_lowercase()))
}

fn string_byte(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let text = args[0].to_text();
    if text.is_empty() {
        return Err(frame.error("string cannot be empty"));
    }
    let index = match args.get(1) {
        Some(value) => expect_integer(frame, value)?,
        None => 0,
    };
    if index < 0 || index as usize >= text.len() {
        return Err(frame.error("index is out of bounds for string"));
    }
    Ok(Value::Integer(text[index as usize] as i64))
}

fn string_char(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let code = expect_integer(frame, &args[0])?;
    if !(1..=255).contains(&code) {
        return Err(frame.error(format!(
            "number is out of range for valid string character: {code}"
        )));
    }
    Ok(Value::String(vec![code as u8]))
}

// math

fn math_pow(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 2)?;
    let base = expect_number(frame, &args[0])?;
    let exponent = expect_number(frame, &args[1])?;
    Ok(Value::Number(base.powf(exponent)))
}

/// Computes `ln(base) / ln(value)`, i.e. the log of the first argument in
/// the base of the second. The argument order is surprising but is the
/// established behavior.
fn math_log(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 2)?;
    let base = expect_number(frame, &args[0])?;
    let value = expect_number(frame, &args[1])?;
    Ok(Value::Number(base.ln() / value.ln()))
}

fn math_sin(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.sin()))
}

fn math_cos(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.cos()))
}

fn math_tan(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.tan()))
}

fn math_asin(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.asin()))
}

fn math_acos(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.acos()))
}

fn math_atan(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.atan()))
}

fn math_signum(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let value = expect_number(frame, &args[0])?;
    let sign = if value == 0.0 { 0.0 } else { value / value.abs() };
    Ok(Value::Number(sign))
}

fn math_abs(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.abs()))
}

fn math_floor(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Number(expect_number(frame, &args[0])?.floor()))
}

fn math_as_int(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    Ok(Value::Integer(expect_integer(frame, &args[0])?))
}

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Returns a uniform double in [0, 1). An integer argument reseeds the
/// generator deterministically; a null argument reseeds from the clock.
fn math_rand(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    if let Some(arg) = args.first() {
        let seed = match arg {
            Value::Null => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos() as u64)
                .unwrap_or(0),
            other => expect_integer(frame, other)? as u64,
        };
        RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed));
    }
    Ok(Value::Number(RNG.with(|rng| rng.borrow_mut().gen::<f64>())))
}

fn math_parse(frame: &Stackframe, args: &mut Vec<Value>) -> NativeResult {
    expect_argc(frame, args, 1)?;
    let text = args[0].to_text();
    let parsed = String::from_utf8_lossy(&text).trim().parse::<f64>();
    match parsed {
        Ok(number) => Ok(Value::Number(number)),
        Err(_) => Err(frame.error(format!(
            "failed to parse value as number: {}",
            args[0].raw_string()
        ))),
    }
}
