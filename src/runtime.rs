use std::cell::{Cell, RefCell};

use indexmap::IndexMap;

use crate::ast::{BinaryOpKind, Expr, Path, Stmt, UnaryOpKind};
use crate::diagnostics::{FilePosition, RuntimeError, TraceFrame};
use crate::module::{Module, ModuleRef};
use crate::value::Value;
use crate::value::{ListHandle, MapHandle};

/// The stackframe depth limit. Exceeding it raises a runtime error instead
/// of overflowing the host stack.
pub const DEPTH_LIMIT: usize = 1024;

/// One activation record. Frames form a borrow chain through `parent`;
/// `boundary` marks a function-call barrier that local lookup never
/// crosses.
pub struct Stackframe<'a> {
    pub parent: Option<&'a Stackframe<'a>>,
    pub module: ModuleRef,
    pub depth: usize,
    pub variables: RefCell<IndexMap<String, Value>>,
    pub body: &'a [Stmt],
    pub function_name: String,
    pub source_pos: Cell<FilePosition>,
    pub boundary: bool,
}

impl<'a> Stackframe<'a> {
    pub fn root(module: ModuleRef) -> Stackframe<'static> {
        Stackframe {
            parent: None,
            module,
            depth: 0,
            variables: RefCell::new(IndexMap::new()),
            body: &[],
            function_name: "<root>".to_string(),
            source_pos: Cell::new(FilePosition::start()),
            boundary: false,
        }
    }

    /// Opens a child frame. Every frame, not just call frames, counts
    /// against the depth limit.
    pub fn branch<'b>(&'b self, pos: FilePosition) -> Result<Stackframe<'b>, RuntimeError> {
        if self.depth > DEPTH_LIMIT {
            return Err(self.error("reached call depth limit"));
        }
        Ok(Stackframe {
            parent: Some(self),
            module: self.module.clone(),
            depth: self.depth + 1,
            variables: RefCell::new(IndexMap::new()),
            body: &[],
            function_name: self.function_name.clone(),
            source_pos: Cell::new(pos),
            boundary: false,
        })
    }

    /// Snapshots the call chain, innermost frame first.
    pub fn backtrace(&self) -> Vec<TraceFrame> {
        let mut trace = Vec::new();
        let mut current = Some(self);
        while let Some(frame) = current {
            trace.push(TraceFrame {
                position: frame.source_pos.get(),
                function: frame.function_name.clone(),
                module: frame.module.borrow().module_name.clone(),
            });
            current = frame.parent;
        }
        trace
    }

    pub fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(message, self.backtrace())
    }

    /// Reads a variable. A lone identifier walks the frame chain up to the
    /// first boundary, then falls back to the current module's globals. A
    /// scoped path descends the import table instead.
    pub fn lookup(&self, path: &Path) -> Result<Value, RuntimeError> {
        let Some(last) = path.members.last() else {
            return Err(self.error("internal error: tried to resolve variable with empty path"));
        };
        if path.members.len() == 1 {
            let mut current = Some(self);
            while let Some(frame) = current {
                if let Some(value) = frame.variables.borrow().get(last) {
                    return Ok(value.clone());
                }
                if frame.boundary {
                    break;
                }
                current = frame.parent;
            }
            return self
                .module
                .borrow()
                .globals
                .get(last)
                .cloned()
                .ok_or_else(|| self.error(format!("could not find variable \"{last}\" in scope")));
        }

        let mut current = self.module.clone();
        for member in &path.members[..path.members.len() - 1] {
            let next = current.borrow().imported.get(member).cloned();
            match next {
                Some(module) => current = module,
                None => {
                    return Err(self.error(format!("could not resolve variable path: {path}")));
                }
            }
        }
        let value = current.borrow().globals.get(last).cloned();
        value.ok_or_else(|| self.error(format!("could not resolve variable path: {path}")))
    }

    /// Resolves a path to a writable place. A lone identifier targets the
    /// frame that already holds the binding, stopping at the first
    /// boundary, and otherwise the writing frame itself; it never targets
    /// module globals. A scoped path targets an existing global of the
    /// final module.
    pub fn place<'f>(&'f self, path: &Path) -> Result<Place<'f>, RuntimeError> {
        let Some(last) = path.members.last() else {
            return Err(self.error("internal error: tried to resolve variable with empty path"));
        };
        if path.members.len() == 1 {
            let mut current: &'f Stackframe<'f> = self;
            loop {
                if current.variables.borrow().contains_key(last) {
                    return Ok(Place::Local {
                        frame: current,
                        name: last.clone(),
                    });
                }
                if current.boundary {
                    break;
                }
                match current.parent {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
            return Ok(Place::Local {
                frame: self,
                name: last.clone(),
            });
        }

        let mut current = self.module.clone();
        for member in &path.members[..path.members.len() - 1] {
            let next = current.borrow().imported.get(member).cloned();
            match next {
                Some(module) => current = module,
                None => {
                    return Err(self.error(format!("could not resolve variable path: {path}")));
                }
            }
        }
        if !current.borrow().globals.contains_key(last) {
            return Err(self.error(format!("could not resolve variable path: {path}")));
        }
        Ok(Place::Global {
            module: current,
            name: last.clone(),
        })
    }

    /// Binds `value` under `path`: a lone identifier lands in this frame's
    /// variables, a scoped path writes through `place`.
    pub fn assign_variable(&self, path: &Path, value: Value) -> Result<(), RuntimeError> {
        if path.members.len() == 1 {
            self.variables
                .borrow_mut()
                .insert(path.members[0].clone(), value);
            Ok(())
        } else {
            self.place(path)?.write(self, value)
        }
    }
}

/// A mutable storage slot produced by evaluating the left-hand side of an
/// assignment.
pub enum Place<'f> {
    Local {
        frame: &'f Stackframe<'f>,
        name: String,
    },
    Global {
        module: ModuleRef,
        name: String,
    },
    Element {
        list: ListHandle,
        index: usize,
    },
    Entry {
        map: MapHandle,
        key: Vec<u8>,
    },
}

impl Place<'_> {
    pub fn write(&self, frame: &Stackframe, value: Value) -> Result<(), RuntimeError> {
        match self {
            Place::Local { frame: target, name } => {
                target.variables.borrow_mut().insert(name.clone(), value);
                Ok(())
            }
            Place::Global { module, name } => {
                module.borrow_mut().globals.insert(name.clone(), value);
                Ok(())
            }
            Place::Element { list, index } => match list.borrow_mut().get_mut(*index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(frame.error(format!("list index is out of bounds: {index}"))),
            },
            Place::Entry { map, key } => {
                map.borrow_mut().insert(key.clone(), value);
                Ok(())
            }
        }
    }
}

/// The three non-local exits. These unwind through frames as ordinary
/// return values, so `try`/`recover` cannot intercept them. Break and
/// Continue carry the backtrace captured where they were raised, for the
/// error reported when no loop consumes them.
pub enum Flow {
    Next,
    Break(Vec<TraceFrame>),
    Continue(Vec<TraceFrame>),
    Return(Value),
}

/// Runs the frame's statement list, stopping at the first non-local exit.
pub fn run_body(frame: &Stackframe) -> Result<Flow, RuntimeError> {
    for stmt in frame.body {
        frame.source_pos.set(stmt.position());
        match stmt.execute(frame)? {
            Flow::Next => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Next)
}

impl Stmt {
    pub fn execute(&self, frame: &Stackframe) -> Result<Flow, RuntimeError> {
        frame.source_pos.set(self.position());
        match self {
            Stmt::Block {
                statements,
                position,
            } => {
                let mut child = frame.branch(*position)?;
                child.body = statements;
                run_body(&child)
            }
            Stmt::Expression { expr, .. } => {
                expr.result(frame)?;
                Ok(Flow::Next)
            }
            Stmt::IfElse {
                predicate,
                true_path,
                false_path,
                ..
            } => {
                let taken = predicate.result(frame)?.is_truthy();
                let branch = if taken {
                    Some(&**true_path)
                } else {
                    false_path.as_deref()
                };
                match branch {
                    Some(stmt) => {
                        let child = frame.branch(stmt.position())?;
                        stmt.execute(&child)
                    }
                    None => Ok(Flow::Next),
                }
            }
            Stmt::TryRecover {
                happy_path,
                recover,
                position,
            } => {
                let child = frame.branch(*position)?;
                match happy_path.execute(&child) {
                    Err(err) => match recover {
                        Some(recover) => {
                            let sad_frame = frame.branch(*position)?;
                            sad_frame.assign_variable(
                                &recover.binding,
                                Value::String(err.message.into_bytes()),
                            )?;
                            recover.sad_path.execute(&sad_frame)
                        }
                        None => Err(err),
                    },
                    flow => flow,
                }
            }
            Stmt::Loop { body, position } => {
                loop {
                    let child = frame.branch(*position)?;
                    match body.execute(&child)? {
                        Flow::Break(_) => break,
                        Flow::Continue(_) | Flow::Next => {}
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Declaration(decl) => {
                let value = decl.value.result(frame)?;
                frame
                    .variables
                    .borrow_mut()
                    .insert(decl.name.clone(), value);
                Ok(Flow::Next)
            }
            Stmt::Break { .. } => Ok(Flow::Break(frame.backtrace())),
            Stmt::Continue { .. } => Ok(Flow::Continue(frame.backtrace())),
            Stmt::Return { value, .. } => Ok(Flow::Return(value.result(frame)?)),
        }
    }
}

impl Expr {
    /// Evaluates the expression to a value, updating the frame's source
    /// position first so diagnostics name the innermost failing atom.
    pub fn result(&self, frame: &Stackframe) -> Result<Value, RuntimeError> {
        frame.source_pos.set(self.position());
        match self {
            Expr::Literal { value, .. } => Ok(value.clone()),
            Expr::Path(path) => frame.lookup(path),
            Expr::Unary { op, value, .. } => match op {
                UnaryOpKind::Not => Ok(Value::Boolean(!value.result(frame)?.is_truthy())),
            },
            Expr::Binary { op, lhs, rhs, .. } => eval_binary(frame, *op, lhs, rhs),
            Expr::Ternary {
                predicate,
                lhs,
                rhs,
                ..
            } => {
                if predicate.result(frame)?.is_truthy() {
                    lhs.result(frame)
                } else {
                    rhs.result(frame)
                }
            }
            Expr::Call {
                function_path,
                arguments,
                ..
            } => {
                let callable = Module::get_function(&frame.module, frame, function_path)?;
                let mut args = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    frame.source_pos.set(arg.position());
                    args.push(arg.result(frame)?);
                }
                callable.call(frame, args)
            }
            Expr::List { members, .. } => {
                let mut elems = Vec::with_capacity(members.len());
                for member in members {
                    frame.source_pos.set(member.position());
                    elems.push(member.result(frame)?);
                }
                Ok(Value::list(elems))
            }
            Expr::Map { pairs, .. } => {
                let mut entries = IndexMap::with_capacity(pairs.len());
                for (key, expr) in pairs {
                    entries.insert(key.clone(), expr.result(frame)?);
                }
                Ok(Value::map(entries))
            }
        }
    }

    /// Evaluates the expression to a writable place. Paths, index
    /// expressions, and ternaries have places; anything else cannot be
    /// assigned to.
    pub fn place<'f>(&self, frame: &'f Stackframe<'f>) -> Result<Place<'f>, RuntimeError> {
        frame.source_pos.set(self.position());
        match self {
            Expr::Path(path) => frame.place(path),
            Expr::Ternary {
                predicate,
                lhs,
                rhs,
                ..
            } => {
                if predicate.result(frame)?.is_truthy() {
                    lhs.place(frame)
                } else {
                    rhs.place(frame)
                }
            }
            Expr::Binary {
                op: BinaryOpKind::Index,
                lhs,
                rhs,
                ..
            } => {
                let target = lhs.result(frame)?;
                match target {
                    Value::List(list) => {
                        frame.source_pos.set(rhs.position());
                        let index = rhs.result(frame)?;
                        let Some(index) = index.as_integer() else {
                            return Err(frame.error(format!(
                                "cannot index list using {}",
                                index.raw_string()
                            )));
                        };
                        if index < 0 || index as usize >= list.borrow().len() {
                            return Err(
                                frame.error(format!("list index is out of bounds: {index}"))
                            );
                        }
                        Ok(Place::Element {
                            list,
                            index: index as usize,
                        })
                    }
                    Value::Map(map) => {
                        frame.source_pos.set(rhs.position());
                        let key = rhs.result(frame)?.to_text();
                        if !map.borrow().contains_key(&key) {
                            map.borrow_mut().insert(key.clone(), Value::Null);
                        }
                        Ok(Place::Entry { map, key })
                    }
                    _ => Err(frame.error(format!(
                        "expression does not support assignment: {lhs}"
                    ))),
                }
            }
            _ => Err(frame.error(format!("expression does not support assignment: {self}"))),
        }
    }
}

fn eval_binary(
    frame: &Stackframe,
    op: BinaryOpKind,
    lhs: &Expr,
    rhs: &Expr,
) -> Result<Value, RuntimeError> {
    match op {
        BinaryOpKind::Index => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            match left {
                Value::String(text) => {
                    let index = rhs.result(frame)?;
                    let Some(idx) = index.as_integer() else {
                        return Err(frame.error(format!(
                            "cannot index string using {}",
                            index.raw_string()
                        )));
                    };
                    if idx < 0 || idx as usize >= text.len() {
                        return Err(frame.error(format!("string index is out of bounds: {idx}")));
                    }
                    Ok(Value::String(vec![text[idx as usize]]))
                }
                Value::List(list) => {
                    let index = rhs.result(frame)?;
                    let Some(idx) = index.as_integer() else {
                        return Err(frame.error(format!(
                            "cannot index list using {}",
                            index.raw_string()
                        )));
                    };
                    let elems = list.borrow();
                    if idx < 0 || idx as usize >= elems.len() {
                        return Err(frame.error(format!("list index is out of bounds: {idx}")));
                    }
                    Ok(elems[idx as usize].clone())
                }
                Value::Map(map) => {
                    let index = rhs.result(frame)?;
                    let key = index.to_text();
                    let value = map.borrow().get(&key).cloned();
                    value.ok_or_else(|| {
                        frame.error(format!(
                            "index does not exist in map: {}",
                            index.raw_string()
                        ))
                    })
                }
                other => Err(frame.error(format!(
                    "cannot index into value {}",
                    other.raw_string()
                ))),
            }
        }
        BinaryOpKind::Assign => {
            let place = lhs.place(frame)?;
            frame.source_pos.set(rhs.position());
            let value = rhs.result(frame)?;
            place.write(frame, value)?;
            Ok(Value::Null)
        }
        BinaryOpKind::Add => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            let right = rhs.result(frame)?;
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                let mut bytes = left.to_text();
                bytes.extend(right.to_text());
                return Ok(Value::String(bytes));
            }
            if let (Value::Integer(x), Value::Integer(y)) = (&left, &right) {
                return Ok(Value::Integer(x.wrapping_add(*y)));
            }
            match (left.as_number(), right.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Number(x + y)),
                _ => Err(frame.error(format!(
                    "cannot add values {} and {}",
                    left.raw_string(),
                    right.raw_string()
                ))),
            }
        }
        BinaryOpKind::Sub => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            let right = rhs.result(frame)?;
            if let (Value::Integer(x), Value::Integer(y)) = (&left, &right) {
                return Ok(Value::Integer(x.wrapping_sub(*y)));
            }
            match (left.as_number(), right.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Number(x - y)),
                _ => Err(frame.error(format!(
                    "cannot subtract values {} and {}",
                    left.raw_string(),
                    right.raw_string()
                ))),
            }
        }
        BinaryOpKind::Mul => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            let right = rhs.result(frame)?;
            if let Value::String(text) = &left {
                if let Some(count) = right.as_integer() {
                    // Negative counts yield the empty string.
                    let count = count.max(0) as usize;
                    let mut out = Vec::with_capacity(text.len() * count);
                    for _ in 0..count {
                        out.extend_from_slice(text);
                    }
                    return Ok(Value::String(out));
                }
            }
            if let (Value::Integer(x), Value::Integer(y)) = (&left, &right) {
                return Ok(Value::Integer(x.wrapping_mul(*y)));
            }
            match (left.as_number(), right.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Number(x * y)),
                _ => Err(frame.error(format!(
                    "cannot multiply values {} and {}",
                    left.raw_string(),
                    right.raw_string()
                ))),
            }
        }
        BinaryOpKind::Div | BinaryOpKind::Mod => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            let right = rhs.result(frame)?;
            if let (Value::Integer(x), Value::Integer(y)) = (&left, &right) {
                if *y == 0 {
                    return Err(frame.error("integer division by zero"));
                }
                return Ok(Value::Integer(if op == BinaryOpKind::Div {
                    x.wrapping_div(*y)
                } else {
                    x.wrapping_rem(*y)
                }));
            }
            match (left.as_number(), right.as_number()) {
                (Some(x), Some(y)) => Ok(Value::Number(if op == BinaryOpKind::Div {
                    x / y
                } else {
                    x % y
                })),
                _ => Err(frame.error(format!(
                    "cannot divide values {} and {}",
                    left.raw_string(),
                    right.raw_string()
                ))),
            }
        }
        BinaryOpKind::Eq => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            Ok(Value::Boolean(left == rhs.result(frame)?))
        }
        BinaryOpKind::Neq => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            Ok(Value::Boolean(left != rhs.result(frame)?))
        }
        BinaryOpKind::Less | BinaryOpKind::Greater | BinaryOpKind::Leq | BinaryOpKind::Geq => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            let right = rhs.result(frame)?;
            let ordered = match (left.as_number(), right.as_number()) {
                (Some(x), Some(y)) => numeric_ordering(op, x, y),
                _ => text_ordering(op, &left.to_text(), &right.to_text()),
            };
            Ok(Value::Boolean(ordered))
        }
        BinaryOpKind::BitAnd | BinaryOpKind::BitOr | BinaryOpKind::Shl | BinaryOpKind::Shr => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            let right = rhs.result(frame)?;
            match (left.as_integer(), right.as_integer()) {
                (Some(x), Some(y)) => Ok(Value::Integer(match op {
                    BinaryOpKind::BitAnd => x & y,
                    BinaryOpKind::BitOr => x | y,
                    BinaryOpKind::Shl => x.wrapping_shl(y as u32),
                    _ => x.wrapping_shr(y as u32),
                })),
                _ => Err(frame.error(format!(
                    "cannot apply bitwise {} to values {} and {}",
                    bitwise_name(op),
                    left.raw_string(),
                    right.raw_string()
                ))),
            }
        }
        BinaryOpKind::Xor => {
            let left = lhs.result(frame)?;
            frame.source_pos.set(rhs.position());
            let right = rhs.result(frame)?;
            if let (Value::Boolean(x), Value::Boolean(y)) = (&left, &right) {
                return Ok(Value::Boolean(x != y));
            }
            match (left.as_integer(), right.as_integer()) {
                (Some(x), Some(y)) => Ok(Value::Integer(x ^ y)),
                _ => Err(frame.error(format!(
                    "cannot apply binary xor to values {} and {}",
                    left.raw_string(),
                    right.raw_string()
                ))),
            }
        }
        BinaryOpKind::And => {
            let left = lhs.result(frame)?.is_truthy();
            if !left {
                return Ok(Value::Boolean(false));
            }
            frame.source_pos.set(rhs.position());
            Ok(Value::Boolean(rhs.result(frame)?.is_truthy()))
        }
        BinaryOpKind::Or => {
            let left = lhs.result(frame)?.is_truthy();
            if left {
                return Ok(Value::Boolean(true));
            }
            frame.source_pos.set(rhs.position());
            Ok(Value::Boolean(rhs.result(frame)?.is_truthy()))
        }
    }
}

fn numeric_ordering(op: BinaryOpKind, x: f64, y: f64) -> bool {
    match op {
        BinaryOpKind::Less => x < y,
        BinaryOpKind::Greater => x > y,
        BinaryOpKind::Leq => x <= y,
        _ => x >= y,
    }
}

fn text_ordering(op: BinaryOpKind, x: &[u8], y: &[u8]) -> bool {
    match op {
        BinaryOpKind::Less => x < y,
        BinaryOpKind::Greater => x > y,
        BinaryOpKind::Leq => x <= y,
        _ => x >= y,
    }
}

fn bitwise_name(op: BinaryOpKind) -> &'static str {
    match op {
        BinaryOpKind::BitAnd => "and",
        BinaryOpKind::BitOr => "or",
        BinaryOpKind::Shl => "left shift",
        _ => "right shift",
    }
}
