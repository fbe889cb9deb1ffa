use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::ast::{Function, Item, Path, Root, Stmt, Use};
use crate::diagnostics::{FilePosition, Result, RuntimeError, ShrimplyError};
use crate::parser;
use crate::runtime::{run_body, Flow, Stackframe};
use crate::stdlib;
use crate::value::Value;

/// Directories after the importing file's own are taken from this
/// `;`-separated environment variable.
pub const MOD_PATHS_ENV: &str = "SHRIMPLY_MOD_PATHS";

pub type ModuleRef = Rc<RefCell<Module>>;

/// A named container of globals, functions, and sub-imports. One module
/// corresponds to one source file, except for the host-provided `std` tree.
pub struct Module {
    pub module_name: String,
    pub imported: IndexMap<String, ModuleRef>,
    pub globals: IndexMap<String, Value>,
    pub functions: IndexMap<String, Callable>,
}

impl Module {
    /// A module without the implicit `std` import. Only the stdlib tree
    /// itself uses this.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            module_name: name.into(),
            imported: IndexMap::new(),
            globals: IndexMap::new(),
            functions: IndexMap::new(),
        }
    }

    pub fn with_std(name: impl Into<String>, stdlib: &ModuleRef) -> Self {
        let mut module = Self::bare(name);
        module.imported.insert("std".to_string(), stdlib.clone());
        module
    }

    /// Resolves a function path: descend the import tables for every member
    /// but the last, then look the last member up among the final module's
    /// functions.
    pub fn get_function(
        module: &ModuleRef,
        frame: &Stackframe,
        path: &Path,
    ) -> std::result::Result<Callable, RuntimeError> {
        let Some(last) = path.members.last() else {
            return Err(frame.error(format!("could not resolve function path: {path}")));
        };
        let mut current = module.clone();
        for member in &path.members[..path.members.len() - 1] {
            let next = current.borrow().imported.get(member).cloned();
            match next {
                Some(module) => current = module,
                None => {
                    return Err(
                        frame.error(format!("could not resolve function path: {path}"))
                    );
                }
            }
        }
        let function = current.borrow().functions.get(last).cloned();
        function.ok_or_else(|| frame.error(format!("could not resolve function path: {path}")))
    }
}

/// A callable installed in a module: either user syntax or a host function.
#[derive(Clone)]
pub enum Callable {
    Syntax(Rc<SyntaxFunction>),
    Native(NativeFunction),
}

impl Callable {
    pub fn call(
        &self,
        frame: &Stackframe,
        args: Vec<Value>,
    ) -> std::result::Result<Value, RuntimeError> {
        match self {
            Callable::Syntax(function) => function.call(frame, args),
            Callable::Native(native) => {
                let mut args = args;
                (native.callback)(frame, &mut args)
            }
        }
    }
}

/// A function defined in source. Holds its flattened body and a back
/// reference to the defining module, which becomes the callee frame's
/// module.
pub struct SyntaxFunction {
    pub name: String,
    pub argument_names: Vec<String>,
    pub pos: FilePosition,
    pub body: Vec<Stmt>,
    pub module: Weak<RefCell<Module>>,
}

impl SyntaxFunction {
    /// Calls the function: bind arguments positionally, default missing
    /// trailing ones to null, ignore extras but expose the supplied count
    /// as `__ARGC`, then run the body in a fresh boundary frame.
    pub fn call(
        &self,
        frame: &Stackframe,
        args: Vec<Value>,
    ) -> std::result::Result<Value, RuntimeError> {
        let argc = args.len() as i64;
        let mut variables = IndexMap::new();
        let mut supplied = args.into_iter();
        for name in &self.argument_names {
            variables.insert(name.clone(), supplied.next().unwrap_or(Value::Null));
        }
        variables.insert("__ARGC".to_string(), Value::Integer(argc));

        let module = self
            .module
            .upgrade()
            .ok_or_else(|| frame.error("internal error: function module is gone"))?;
        let mut child = frame.branch(self.pos)?;
        child.module = module;
        child.function_name = self.name.clone();
        child.variables = RefCell::new(variables);
        child.body = &self.body;
        child.boundary = true;

        match run_body(&child)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::Null),
            Flow::Break(trace) => Err(RuntimeError::new("unhandled break statement", trace)),
            Flow::Continue(trace) => {
                Err(RuntimeError::new("unhandled continue statement", trace))
            }
        }
    }
}

/// A host-provided function. Takes the calling frame and the evaluated
/// argument vector.
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub callback: fn(&Stackframe, &mut Vec<Value>) -> std::result::Result<Value, RuntimeError>,
}

/// Reads and parses one source file.
pub fn parse_file(path: &FsPath) -> Result<Root> {
    let source = fs::read_to_string(path)?;
    Ok(parser::parse_source(&source, path)?)
}

/// Builds modules from parsed roots, sharing one registry of canonical
/// path to module so diamond imports alias instead of reloading.
pub struct ModuleLoader {
    registry: HashMap<PathBuf, ModuleRef>,
    stdlib: ModuleRef,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
            stdlib: stdlib::install(),
        }
    }

    pub fn stdlib(&self) -> &ModuleRef {
        &self.stdlib
    }

    /// Builds a module from a parsed root. Three passes: imports, then
    /// functions, then globals in source order, so an initializer may
    /// reference earlier globals and any function or import.
    pub fn load_root(
        &mut self,
        filepath: &FsPath,
        root: Root,
        frame: &Stackframe,
        mut cycles: HashSet<PathBuf>,
    ) -> Result<ModuleRef> {
        cycles.insert(canonical_or_self(filepath));
        let name = filepath
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("<module>")
            .to_string();
        let module = Rc::new(RefCell::new(Module::with_std(name, &self.stdlib)));
        let mut eval_frame = frame.branch(FilePosition::start())?;
        eval_frame.module = module.clone();

        let mut uses = Vec::new();
        let mut functions = Vec::new();
        let mut declarations = Vec::new();
        for item in root.items {
            match item {
                Item::Use(import) => uses.push(import),
                Item::Function(function) => functions.push(function),
                Item::Declaration(decl) => declarations.push(decl),
            }
        }

        for import in &uses {
            let (name, imported) = self.load_import(filepath, import, &eval_frame, &cycles)?;
            module.borrow_mut().imported.insert(name, imported);
        }

        for function in functions {
            let Function {
                name,
                arguments,
                body,
                position,
            } = function;
            let body = match *body {
                Stmt::Block { statements, .. } => statements,
                other => vec![other],
            };
            let syntax_fn = SyntaxFunction {
                name: name.clone(),
                argument_names: arguments,
                pos: position,
                body,
                module: Rc::downgrade(&module),
            };
            module
                .borrow_mut()
                .functions
                .insert(name, Callable::Syntax(Rc::new(syntax_fn)));
        }

        for decl in declarations {
            let value = decl.value.result(&eval_frame)?;
            module.borrow_mut().globals.insert(decl.name, value);
        }

        Ok(module)
    }

    /// Resolves and loads one `use`, reusing the registry where possible.
    /// Returns the binding name (the path's last member) and the module.
    pub fn load_import(
        &mut self,
        importer: &FsPath,
        import: &Use,
        frame: &Stackframe,
        cycles: &HashSet<PathBuf>,
    ) -> Result<(String, ModuleRef)> {
        let Some(module_name) = import.module.members.last().cloned() else {
            return Err(frame
                .error("internal error: tried to resolve an empty import path")
                .into());
        };
        let import_path = self.resolve_import(importer, &import.module, frame)?;

        if cycles.contains(&import_path) {
            return Err(frame
                .error(format!(
                    "dependency cycle detected for module {}",
                    import.module
                ))
                .into());
        }
        if let Some(existing) = self.registry.get(&import_path) {
            return Ok((module_name, existing.clone()));
        }

        let loaded = parse_file(&import_path).and_then(|child_root| {
            self.load_root(&import_path, child_root, frame, cycles.clone())
        });
        match loaded {
            Ok(child) => {
                child.borrow_mut().module_name = module_name.clone();
                self.registry.insert(import_path, child.clone());
                Ok((module_name, child))
            }
            Err(err) => {
                let message = match err {
                    ShrimplyError::Runtime(inner) => inner.message,
                    other => other.to_string(),
                };
                Err(frame
                    .error(format!(
                        "failed to load module at \"{}\": {}",
                        import_path.display(),
                        message
                    ))
                    .into())
            }
        }
    }

    /// Resolves `a::b::c` on disk: search the importing file's directory,
    /// then each entry of the mod-paths variable, for a directory entry
    /// whose stem is the first member; descend through the members and
    /// attach the `.spl` extension to the last.
    fn resolve_import(
        &self,
        importer: &FsPath,
        module_path: &Path,
        frame: &Stackframe,
    ) -> Result<PathBuf> {
        let Some(first) = module_path.members.first() else {
            return Err(frame
                .error("internal error: tried to resolve an empty import path")
                .into());
        };

        let mut roots = Vec::new();
        match importer.parent() {
            Some(parent) if parent.as_os_str().is_empty() => roots.push(PathBuf::from(".")),
            Some(parent) => roots.push(parent.to_path_buf()),
            None => roots.push(PathBuf::from(".")),
        }
        if let Ok(raw) = env::var(MOD_PATHS_ENV) {
            for piece in raw.split(';') {
                if !piece.is_empty() {
                    roots.push(PathBuf::from(piece));
                }
            }
        }

        let mut base = None;
        for root in &roots {
            if dir_contains_stem(root, first, frame)? {
                base = Some(root.clone());
                break;
            }
        }
        let Some(mut current) = base else {
            return Err(frame
                .error(format!("could not resolve module path: {module_path}"))
                .into());
        };

        for member in &module_path.members {
            if !dir_contains_stem(&current, member, frame)? {
                return Err(frame
                    .error(format!(
                        "could not resolve \"{}\" in path \"{}\": {}",
                        member,
                        current.display(),
                        module_path
                    ))
                    .into());
            }
            current.push(member);
        }
        current.set_extension("spl");
        let canonical = fs::canonicalize(&current)
            .map_err(|err| frame.error(format!("failed to read path: {err}")))?;
        Ok(canonical)
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn dir_contains_stem(
    dir: &FsPath,
    stem: &str,
    frame: &Stackframe,
) -> Result<bool> {
    let entries =
        fs::read_dir(dir).map_err(|err| frame.error(format!("failed to read path: {err}")))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn canonical_or_self(path: &FsPath) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Loads and runs a program from disk. `args` becomes the list handed to
/// `main`; by convention its first element is the script path itself.
pub fn run_program(path: &FsPath, args: Vec<String>) -> Result<Value> {
    let source = fs::read_to_string(path)?;
    run_source(&source, path, args)
}

/// Runs a program held in memory. `path` anchors diagnostics and import
/// resolution.
pub fn run_source(source: &str, path: &FsPath, args: Vec<String>) -> Result<Value> {
    let root = parser::parse_source(source, path)?;
    let mut loader = ModuleLoader::new();
    let bootstrap = Rc::new(RefCell::new(Module::bare("<root>")));
    let root_frame = Stackframe::root(bootstrap);
    let module = loader.load_root(path, root, &root_frame, HashSet::new())?;
    module.borrow_mut().module_name = "<root>".to_string();

    let main = module.borrow().functions.get("main").cloned();
    let Some(main) = main else {
        return Err(root_frame.error("no main function found").into());
    };
    if let Callable::Syntax(function) = &main {
        if function.argument_names.len() != 1 {
            return Err(root_frame
                .error("main function must have exactly one argument")
                .into());
        }
    }

    let argv = Value::list(
        args.into_iter()
            .map(|arg| Value::String(arg.into_bytes()))
            .collect(),
    );
    Ok(main.call(&root_frame, vec![argv])?)
}
