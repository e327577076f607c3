//! Main execution loop and instruction dispatch for the OMG VM.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use omg_common::{FuncRef, Instr, Value};

use crate::builtins;
use crate::error::RuntimeError;
use crate::machine::{Block, Frame, Vm};

impl<'a> Vm<'a> {
    /// Execute from the image entry point until halt or an unhandled
    /// error. Returns the top of the operand stack (or `none`).
    ///
    /// Every instruction either succeeds or produces a [`RuntimeError`].
    /// Catchable errors unwind to the nearest `SETUP_EXCEPT` block;
    /// fatal ones (`VmInvariant`) abort immediately.
    pub fn execute(&mut self) -> Result<Value, RuntimeError> {
        self.pc = self.image.entry;

        while self.pc < self.image.code.len() {
            let instr = self.image.code[self.pc].clone();
            self.pc += 1;
            self.fuel += 1;

            if let Err(err) = self.step(instr) {
                self.unwind(err)?;
            }
        }

        debug!(fuel = self.fuel, "halted");
        Ok(self.stack.pop().unwrap_or(Value::None))
    }

    fn step(&mut self, instr: Instr) -> Result<(), RuntimeError> {
        match instr {
            // ----- Literals -----
            Instr::PushInt(v) => self.push(Value::Int(v)),
            Instr::PushStr(s) => self.push(Value::Str(s)),
            Instr::PushBool(b) => self.push(Value::Bool(b)),
            Instr::PushNone => self.push(Value::None),

            // ----- Aggregate construction -----
            Instr::BuildList(n) => self.exec_build_list(n as usize)?,
            Instr::BuildDict(n) => self.exec_build_dict(n as usize)?,

            // ----- Variables -----
            Instr::Load(name) => self.exec_load(name)?,
            Instr::Store(name) => self.exec_store(name)?,
            Instr::StoreGlobal(name) => {
                let value = self.pop()?;
                self.globals.borrow_mut().insert(name, value);
            }

            // ----- Arithmetic -----
            Instr::Add => self.exec_add()?,
            Instr::Sub => self.exec_int_binop("-", i64::wrapping_sub)?,
            Instr::Mul => self.exec_int_binop("*", i64::wrapping_mul)?,
            Instr::Div => self.exec_div_mod("/", i64::wrapping_div)?,
            Instr::Mod => self.exec_div_mod("%", i64::wrapping_rem)?,
            Instr::Neg => {
                let v = self.pop_int("unary -")?;
                self.push(Value::Int(v.wrapping_neg()));
            }

            // ----- Comparison -----
            Instr::Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b));
            }
            Instr::Ne => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a != b));
            }
            Instr::Lt => self.exec_ordering("<", Ordering::is_lt)?,
            Instr::Le => self.exec_ordering("<=", Ordering::is_le)?,
            Instr::Gt => self.exec_ordering(">", Ordering::is_gt)?,
            Instr::Ge => self.exec_ordering(">=", Ordering::is_ge)?,

            // ----- Bitwise -----
            Instr::BAnd => self.exec_int_binop("&", |a, b| a & b)?,
            Instr::BOr => self.exec_int_binop("|", |a, b| a | b)?,
            Instr::BXor => self.exec_int_binop("^", |a, b| a ^ b)?,
            Instr::Shl => self.exec_int_binop("<<", |a, b| a.wrapping_shl(b as u32))?,
            Instr::Shr => self.exec_int_binop(">>", |a, b| a.wrapping_shr(b as u32))?,
            Instr::BNot => {
                let v = self.pop_int("~")?;
                self.push(Value::Int(!v));
            }

            // ----- Logical -----
            Instr::And => {
                let b = self.pop()?.is_truthy();
                let a = self.pop()?.is_truthy();
                self.push(Value::Bool(a && b));
            }
            Instr::Or => {
                let b = self.pop()?.is_truthy();
                let a = self.pop()?.is_truthy();
                self.push(Value::Bool(a || b));
            }
            Instr::Not => {
                let v = self.pop()?;
                self.push(Value::Bool(!v.is_truthy()));
            }

            // ----- Indexing / slicing / attributes -----
            Instr::Index => self.exec_index()?,
            Instr::Slice => self.exec_slice()?,
            Instr::IndexSet => self.exec_index_set()?,
            Instr::Attr(name) => self.exec_attr(&name)?,
            Instr::AttrSet(name) => self.exec_attr_set(&name)?,

            // ----- Control -----
            Instr::Jump(target) => self.pc = target,
            Instr::JumpIfFalse(target) => {
                if !self.pop()?.is_truthy() {
                    self.pc = target;
                }
            }
            Instr::Call(fidx, argc) => {
                let args = self.pop_args(argc as usize)?;
                self.enter_function(fidx as usize, args, false)?;
            }
            Instr::TailCall(fidx, argc) => {
                let args = self.pop_args(argc as usize)?;
                self.enter_function(fidx as usize, args, true)?;
            }
            Instr::CallValue(argc) => self.exec_call_value(argc as usize)?,
            Instr::Builtin(name, argc) => {
                let args = self.pop_args(argc as usize)?;
                let result = self.call_builtin(&name, &args)?;
                self.push(result);
            }
            Instr::Pop => {
                self.pop()?;
            }
            Instr::Return => self.exec_return()?,
            Instr::Emit => {
                let line = self.pop()?.to_string();
                self.emit_line(line);
            }
            Instr::Halt => self.pc = self.image.code.len(),

            // ----- Exceptions -----
            Instr::SetupExcept(handler) => self.blocks.push(Block {
                handler,
                stack_depth: self.stack.len(),
                frame_depth: self.frames.len(),
            }),
            Instr::PopBlock => {
                self.blocks.pop().ok_or_else(|| {
                    RuntimeError::Invariant("POP_BLOCK with empty block stack".to_string())
                })?;
            }
            Instr::Raise(kind) => {
                let message = self.pop()?.to_string();
                return Err(RuntimeError::from_kind(kind, message));
            }
            Instr::Assert => {
                if !self.pop()?.is_truthy() {
                    return Err(RuntimeError::Assertion("assertion failed".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Unwind after a catchable error: pop the topmost block, restore
    /// the depths it captured, deliver the error value, and resume at
    /// its handler. Without a handler the error reaches the embedder.
    fn unwind(&mut self, err: RuntimeError) -> Result<(), RuntimeError> {
        if err.is_fatal() {
            return Err(err);
        }
        match self.blocks.pop() {
            Some(block) => {
                trace!(handler = block.handler, %err, "unwinding to handler");
                self.frames.truncate(block.frame_depth);
                self.stack.truncate(block.stack_depth);

                let mut entries = IndexMap::new();
                entries.insert(
                    "kind".to_string(),
                    Value::Str(err.kind().name().to_string()),
                );
                entries.insert("message".to_string(), Value::Str(err.message().to_string()));
                self.push(Value::dict(entries));

                self.pc = block.handler;
                Ok(())
            }
            None => Err(err),
        }
    }

    // ---- Variables ----

    /// `LOAD`: locals first, then globals, then the function table
    /// (yielding a first-class reference that captures globals).
    fn exec_load(&mut self, name: String) -> Result<(), RuntimeError> {
        if let Some(value) = self.lookup(&name) {
            self.push(value);
            return Ok(());
        }
        if let Some(index) = self.image.func_index(&name) {
            let func = Value::Func(FuncRef {
                index,
                name: Rc::from(name.as_str()),
                globals: Rc::clone(&self.globals),
            });
            self.push(func);
            return Ok(());
        }
        Err(RuntimeError::UndefinedIdent(name))
    }

    /// `STORE`: locals inside a frame, globals at top level.
    fn exec_store(&mut self, name: String) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        match self.frames.last_mut() {
            Some(frame) => {
                frame.locals.insert(name, value);
            }
            None => {
                self.globals.borrow_mut().insert(name, value);
            }
        }
        Ok(())
    }

    // ---- Arithmetic ----

    fn pop_int(&mut self, op: &str) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Value::Int(i) => Ok(i),
            other => Err(RuntimeError::Type(format!(
                "'{op}' expects an int, got {}",
                other.type_name()
            ))),
        }
    }

    fn exec_int_binop(&mut self, op: &str, f: fn(i64, i64) -> i64) -> Result<(), RuntimeError> {
        let b = self.pop_int(op)?;
        let a = self.pop_int(op)?;
        self.push(Value::Int(f(a, b)));
        Ok(())
    }

    fn exec_div_mod(&mut self, op: &str, f: fn(i64, i64) -> i64) -> Result<(), RuntimeError> {
        let b = self.pop_int(op)?;
        let a = self.pop_int(op)?;
        if b == 0 {
            return Err(RuntimeError::ZeroDivision(
                "integer division or modulo by zero".to_string(),
            ));
        }
        self.push(Value::Int(f(a, b)));
        Ok(())
    }

    /// `ADD`: Int addition, Str concatenation (stringifying the other
    /// side), or List concatenation into a fresh list.
    fn exec_add(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(y)),
            (Value::Str(x), Value::Str(y)) => Value::Str(x + &y),
            (Value::Str(x), y) => Value::Str(x + &y.to_string()),
            (x, Value::Str(y)) => Value::Str(x.to_string() + &y),
            (Value::List(x), Value::List(y)) => {
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                Value::list(items)
            }
            (a, b) => {
                return Err(RuntimeError::Type(format!(
                    "unsupported operand types for '+': {} and {}",
                    a.type_name(),
                    b.type_name()
                )))
            }
        };
        self.push(result);
        Ok(())
    }

    /// Ordering comparisons are defined on two Ints or two Strs only.
    fn exec_ordering(&mut self, op: &str, f: fn(Ordering) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ordering = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => {
                return Err(RuntimeError::Type(format!(
                    "'{op}' not supported between {} and {}",
                    a.type_name(),
                    b.type_name()
                )))
            }
        };
        self.push(Value::Bool(f(ordering)));
        Ok(())
    }

    // ---- Structures ----

    fn exec_build_list(&mut self, n: usize) -> Result<(), RuntimeError> {
        let items = self.pop_args(n)?;
        self.push(Value::list(items));
        Ok(())
    }

    fn exec_build_dict(&mut self, n: usize) -> Result<(), RuntimeError> {
        let mut pairs = Vec::with_capacity(n);
        for _ in 0..n {
            let value = self.pop()?;
            let key = dict_key(self.pop()?)?;
            pairs.push((key, value));
        }
        let mut entries = IndexMap::with_capacity(n);
        for (key, value) in pairs.into_iter().rev() {
            entries.insert(key, value);
        }
        self.push(Value::dict(entries));
        Ok(())
    }

    fn exec_index(&mut self) -> Result<(), RuntimeError> {
        let key = self.pop()?;
        let base = self.pop()?;
        let value = match (&base, &key) {
            (Value::List(list), Value::Int(i)) => {
                let list = list.borrow();
                list_index(&list, *i)?.clone()
            }
            (Value::List(_), other) => {
                return Err(RuntimeError::Type(format!(
                    "list index must be an int, got {}",
                    other.type_name()
                )))
            }
            (Value::Dict(map), key) => {
                let key = dict_key(key.clone())?;
                map.borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| RuntimeError::Key(format!("Key '{key}' not found")))?
            }
            (Value::FrozenDict(map), key) => {
                let key = dict_key(key.clone())?;
                map.get(&key)
                    .cloned()
                    .ok_or_else(|| RuntimeError::Key(format!("Key '{key}' not found")))?
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                if *i < 0 || *i as usize >= chars.len() {
                    return Err(RuntimeError::Index(format!(
                        "string index {i} out of bounds (length {})",
                        chars.len()
                    )));
                }
                Value::Str(chars[*i as usize].to_string())
            }
            (Value::Str(_), other) => {
                return Err(RuntimeError::Type(format!(
                    "string index must be an int, got {}",
                    other.type_name()
                )))
            }
            (other, _) => {
                return Err(RuntimeError::Type(format!(
                    "{} is not indexable",
                    other.type_name()
                )))
            }
        };
        self.push(value);
        Ok(())
    }

    /// `SLICE`: pop end, start, target. An end of `none` means "to the
    /// end"; both bounds must otherwise be non-negative Ints within the
    /// target.
    fn exec_slice(&mut self) -> Result<(), RuntimeError> {
        let end = self.pop()?;
        let start = self.pop()?;
        let base = self.pop()?;

        let start = slice_bound(&start, "start")?;
        let result = match base {
            Value::List(list) => {
                let list = list.borrow();
                let (start, end) = slice_range(start, &end, list.len())?;
                Value::list(list[start..end].to_vec())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_range(start, &end, chars.len())?;
                Value::Str(chars[start..end].iter().collect())
            }
            other => {
                return Err(RuntimeError::Type(format!(
                    "{} is not sliceable",
                    other.type_name()
                )))
            }
        };
        self.push(result);
        Ok(())
    }

    fn exec_index_set(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let key = self.pop()?;
        let base = self.pop()?;
        match (base, key) {
            (Value::List(list), Value::Int(i)) => {
                if i < 0 {
                    return Err(RuntimeError::Index(format!(
                        "list index {i} out of bounds"
                    )));
                }
                let mut list = list.borrow_mut();
                let index = i as usize;
                if index >= list.len() {
                    list.resize(index + 1, Value::Int(0));
                }
                list[index] = value;
            }
            (Value::List(_), other) => {
                return Err(RuntimeError::Type(format!(
                    "list index must be an int, got {}",
                    other.type_name()
                )))
            }
            (Value::Dict(map), key) => {
                map.borrow_mut().insert(dict_key(key)?, value);
            }
            (Value::FrozenDict(_), _) => {
                return Err(RuntimeError::Type(
                    "cannot assign into a frozen dict".to_string(),
                ))
            }
            (other, _) => {
                return Err(RuntimeError::Type(format!(
                    "{} does not support indexed assignment",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// `ATTR name` is `INDEX` with the name as key; dicts only.
    fn exec_attr(&mut self, name: &str) -> Result<(), RuntimeError> {
        let base = self.pop()?;
        let value = match &base {
            Value::Dict(map) => map.borrow().get(name).cloned(),
            Value::FrozenDict(map) => map.get(name).cloned(),
            other => {
                return Err(RuntimeError::Type(format!(
                    "{} has no attribute '{name}'",
                    other.type_name()
                )))
            }
        };
        match value {
            Some(v) => {
                self.push(v);
                Ok(())
            }
            None => Err(RuntimeError::Key(format!("Key '{name}' not found"))),
        }
    }

    fn exec_attr_set(&mut self, name: &str) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let base = self.pop()?;
        match base {
            Value::Dict(map) => {
                map.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::FrozenDict(_) => Err(RuntimeError::Type(
                "cannot assign into a frozen dict".to_string(),
            )),
            other => Err(RuntimeError::Type(format!(
                "{} has no attribute '{name}'",
                other.type_name()
            ))),
        }
    }

    // ---- Calls ----

    /// Enter a function-table entry. A tail call rebinds the current
    /// frame's locals and jumps, preserving the recorded return
    /// coordinates; a top-level tail call degenerates to a plain call.
    fn enter_function(
        &mut self,
        index: usize,
        args: Vec<Value>,
        tail: bool,
    ) -> Result<(), RuntimeError> {
        let func = &self.image.funcs[index];
        if args.len() != func.param_count {
            return Err(RuntimeError::Type(format!(
                "Function '{}' expects {} arguments",
                func.name, func.param_count
            )));
        }
        let locals: HashMap<String, Value> = func.params().iter().cloned().zip(args).collect();

        match self.frames.last_mut() {
            Some(frame) if tail => {
                frame.locals = locals;
            }
            _ => {
                self.frames.push(Frame {
                    locals,
                    return_pc: self.pc,
                    stack_depth: self.stack.len(),
                    block_depth: self.blocks.len(),
                });
                self.max_frame_depth = self.max_frame_depth.max(self.frames.len());
            }
        }
        self.pc = func.entry;
        Ok(())
    }

    /// `CALL_VALUE`: call through a value. FuncRefs and names of user
    /// functions enter a frame; a name that resolves to a builtin runs
    /// in the caller's frame, as if `BUILTIN` had been emitted.
    fn exec_call_value(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let args = self.pop_args(argc)?;
        let callee = self.pop()?;
        match callee {
            Value::Func(func) => self.enter_function(func.index, args, false),
            Value::Str(name) => {
                if let Some(index) = self.image.func_index(&name) {
                    self.enter_function(index, args, false)
                } else if builtins::is_builtin(&name) {
                    let result = self.call_builtin(&name, &args)?;
                    self.push(result);
                    Ok(())
                } else {
                    Err(RuntimeError::UndefinedIdent(name))
                }
            }
            other => Err(RuntimeError::Type(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    /// `RETURN`: restore the caller's stack depth plus the return value
    /// and resume at the recorded address. Handlers installed inside
    /// the returning function are dropped with it.
    fn exec_return(&mut self) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::Invariant("RETURN with no active frame".to_string()))?;
        if self.stack.len() < frame.stack_depth {
            return Err(RuntimeError::Invariant(format!(
                "operand stack below caller depth at RETURN ({} < {})",
                self.stack.len(),
                frame.stack_depth
            )));
        }
        self.stack.truncate(frame.stack_depth);
        self.blocks.truncate(frame.block_depth);
        self.push(value);
        self.pc = frame.return_pc;
        Ok(())
    }
}

/// Dict keys are Strs; Int keys are formatted to decimal.
fn dict_key(key: Value) -> Result<String, RuntimeError> {
    match key {
        Value::Str(s) => Ok(s),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(RuntimeError::Type(format!(
            "dict key must be a string, got {}",
            other.type_name()
        ))),
    }
}

fn list_index(list: &[Value], i: i64) -> Result<&Value, RuntimeError> {
    if i < 0 || i as usize >= list.len() {
        return Err(RuntimeError::Index(format!(
            "list index {i} out of bounds (length {})",
            list.len()
        )));
    }
    Ok(&list[i as usize])
}

fn slice_bound(value: &Value, which: &str) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::Type(format!(
            "slice {which} must be an int, got {}",
            other.type_name()
        ))),
    }
}

fn slice_range(start: i64, end: &Value, len: usize) -> Result<(usize, usize), RuntimeError> {
    let end = match end {
        Value::None => len as i64,
        other => slice_bound(other, "end")?,
    };
    if start < 0 || end < 0 || start > end || end as usize > len {
        return Err(RuntimeError::Index(format!(
            "slice {start}:{end} out of bounds (length {len})"
        )));
    }
    Ok((start as usize, end as usize))
}
