use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

use rustyline::{error::ReadlineError, DefaultEditor};

use crate::ast::{Item, Root, Stmt};
use crate::diagnostics::{Result, ShrimplyError};
use crate::module::{Callable, Module, ModuleLoader, ModuleRef, SyntaxFunction};
use crate::parser::parse_source;
use crate::runtime::Stackframe;
use crate::value::Value;

/// An interactive session. Top-level items accumulate in a persistent
/// scratch module; anything else is wrapped in a synthetic function,
/// executed, and its non-null result echoed.
pub struct Repl {
    loader: ModuleLoader,
    module: ModuleRef,
}

impl Repl {
    pub fn new() -> Self {
        let loader = ModuleLoader::new();
        let module = Rc::new(RefCell::new(Module::with_std("<repl>", loader.stdlib())));
        Self { loader, module }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()
            .map_err(|err| ShrimplyError::from(io::Error::new(io::ErrorKind::Other, err)))?;
        loop {
            match editor.readline(">> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":exit" {
                        break;
                    }
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    match self.eval_line(trimmed) {
                        Ok(Some(value)) => println!("{value}"),
                        Ok(None) => {}
                        Err(err) => eprintln!("{err}"),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    return Err(ShrimplyError::from(io::Error::new(
                        io::ErrorKind::Other,
                        err,
                    )));
                }
            }
        }
        Ok(())
    }

    fn eval_line(&mut self, line: &str) -> Result<Option<Value>> {
        let virtual_path = PathBuf::from("repl.spl");
        if let Ok(root) = parse_source(line, &virtual_path) {
            self.merge_items(root)?;
            return Ok(None);
        }

        // Not a top-level item; wrap as an expression first, then as a
        // bare statement.
        let expr = line.trim_end_matches(';');
        let root = match parse_source(
            &format!("fn __line(args) {{ return {expr} ; }}"),
            &virtual_path,
        ) {
            Ok(root) => root,
            Err(_) => parse_source(&format!("fn __line(args) {{ {line} }}"), &virtual_path)?,
        };
        let Some(Item::Function(function)) = root.items.into_iter().next() else {
            return Ok(None);
        };
        let body = match *function.body {
            Stmt::Block { statements, .. } => statements,
            other => vec![other],
        };
        let synthetic = SyntaxFunction {
            name: "<repl>".to_string(),
            argument_names: function.arguments,
            pos: function.position,
            body,
            module: Rc::downgrade(&self.module),
        };
        let frame = Stackframe::root(self.module.clone());
        let value = synthetic.call(&frame, Vec::new())?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    fn merge_items(&mut self, root: Root) -> Result<()> {
        let frame = Stackframe::root(self.module.clone());
        let importer = PathBuf::from("repl.spl");
        for item in root.items {
            match item {
                Item::Use(import) => {
                    let (name, imported) =
                        self.loader
                            .load_import(&importer, &import, &frame, &HashSet::new())?;
                    self.module.borrow_mut().imported.insert(name, imported);
                }
                Item::Function(function) => {
                    let body = match *function.body {
                        Stmt::Block { statements, .. } => statements,
                        other => vec![other],
                    };
                    let syntax_fn = SyntaxFunction {
                        name: function.name.clone(),
                        argument_names: function.arguments,
                        pos: function.position,
                        body,
                        module: Rc::downgrade(&self.module),
                    };
                    self.module
                        .borrow_mut()
                        .functions
                        .insert(function.name, Callable::Syntax(Rc::new(syntax_fn)));
                }
                Item::Declaration(decl) => {
                    let value = decl.value.result(&frame)?;
                    self.module.borrow_mut().globals.insert(decl.name, value);
                }
            }
        }
        Ok(())
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}
