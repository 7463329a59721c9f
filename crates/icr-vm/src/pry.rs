//! The pry debugger: stop at a source line, evaluate expressions against
//! the live stack, then resume.
//!
//! A stop builds a child interpreter that shares the context and executes
//! directly over the suspended frame's locals (its stack is a view of the
//! parent's buffer at the current `stack_bottom`). The bytes beyond the
//! locals region are saved around the session and restored afterwards, so
//! a pry evaluation can scribble temporaries without disturbing the
//! suspended expression.

use std::io::{BufRead, BufReader, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use icr_core::Node;

use crate::compiler::Compiler;
use crate::interpreter::{Cached, Interpreter};
use crate::local_vars::LocalVarLayout;
use crate::op::disassemble;
use crate::stack::ValueStack;

/// Pry's terminal. Injectable so sessions are scriptable; the default is
/// the process's stdin/stderr.
pub struct PryIo {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
}

impl PryIo {
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self { input, output }
    }

    /// Scripted session: commands come from `commands`, output lands in the
    /// returned shared buffer.
    pub fn scripted(commands: &str) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let io = Self {
            input: Box::new(BufReader::new(std::io::Cursor::new(commands.to_string()))),
            output: Box::new(SharedBuffer(buffer.clone())),
        };
        (io, buffer)
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Called at each dispatch step while pry is armed. Honors the request iff
/// the executing frame is within the stepping target and the upcoming
/// instruction maps to a source line different from the last stop.
pub(crate) fn check(interpreter: &mut Interpreter, cached: &Cached, compiler: &dyn Compiler) {
    let frame = interpreter.call_stack.last().unwrap();
    if let Some(max) = interpreter.pry_max_target_frame {
        if frame.real_frame_index as i64 > max {
            return;
        }
    }

    let node = match cached.nodes.find(cached.ip as u32) {
        Some(node) => node.clone(),
        None => return,
    };
    let loc = match node.loc() {
        Some(loc) => loc,
        None => return,
    };
    let same_line = interpreter
        .pry_node
        .as_ref()
        .and_then(|previous| previous.loc())
        .map_or(false, |previous| {
            previous.line == loc.line && previous.file == loc.file
        });
    if same_line {
        return;
    }

    session(interpreter, &node, cached, compiler);
}

fn session(interpreter: &mut Interpreter, node: &Node, cached: &Cached, compiler: &dyn Compiler) {
    let frame = interpreter.call_stack.last().unwrap();
    let def = frame.def.clone();
    let real_frame_index = frame.real_frame_index;
    let stack_bottom = cached.stack_bottom;
    let locals_end = stack_bottom + def.max_bytesize();

    say(interpreter, &whereami_line(node));

    // A nested evaluation may overwrite the expression temporaries beyond
    // the locals; save them for the resume.
    let top = interpreter.stack.top();
    let saved = if top > locals_end {
        interpreter.stack.read_bytes(locals_end, top - locals_end).to_vec()
    } else {
        Vec::new()
    };

    let (local_vars, block_level) = match node.loc().and_then(|loc| compiler.gather_locals(loc)) {
        Some((meta_vars, level)) => (
            LocalVarLayout::from_meta_vars(&meta_vars, &interpreter.context),
            level,
        ),
        None => (def.local_vars.clone(), interpreter.block_level),
    };

    let view = unsafe {
        ValueStack::view(
            interpreter.stack.pointer_at(stack_bottom),
            interpreter.stack.capacity() - stack_bottom,
            def.max_bytesize(),
        )
    };
    let mut child = Interpreter::with_stack(interpreter.context.clone(), view, block_level);
    child.local_vars = local_vars;

    loop {
        let line = match read_line(interpreter) {
            Some(line) => line,
            None => {
                // End of input behaves like continue.
                disarm(interpreter);
                break;
            }
        };
        let line = line.trim();

        match line {
            "" => continue,
            "continue" => {
                disarm(interpreter);
                break;
            }
            "step" => {
                interpreter.pry_node = Some(node.clone());
                interpreter.pry_max_target_frame = None;
                break;
            }
            "next" => {
                interpreter.pry_node = Some(node.clone());
                interpreter.pry_max_target_frame = Some(real_frame_index as i64);
                break;
            }
            "finish" => {
                interpreter.pry_node = Some(node.clone());
                interpreter.pry_max_target_frame = Some(real_frame_index as i64 - 1);
                break;
            }
            "whereami" => {
                let text = whereami_line(node);
                say(interpreter, &text);
            }
            "disassemble" => {
                let text = disassemble(&cached.instructions, &cached.nodes);
                say(interpreter, &text);
            }
            expr => {
                evaluate(interpreter, &mut child, compiler, expr, def.max_bytesize());
            }
        }
    }

    if !saved.is_empty() {
        unsafe {
            std::ptr::copy_nonoverlapping(
                saved.as_ptr(),
                interpreter.stack.pointer_at(locals_end),
                saved.len(),
            );
        }
    }
}

/// Compile and run one pry expression against the child interpreter.
/// Failures of any kind are reported and the session continues.
fn evaluate(
    interpreter: &mut Interpreter,
    child: &mut Interpreter,
    compiler: &dyn Compiler,
    expr: &str,
    locals_bytesize: usize,
) {
    let compiled = compiler.compile_pry(
        &interpreter.context,
        &child.local_vars,
        expr,
        child.block_level,
    );
    let def = match compiled {
        Ok(def) => def,
        Err(error) => {
            let text = format!("error: {}", error);
            say(interpreter, &text);
            return;
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| child.run_compiled(def, compiler)));
    match outcome {
        Ok(value) => {
            let text = format!("=> {}", value);
            say(interpreter, &text);
        }
        Err(payload) => {
            let message = panic_message(&payload);
            let text = format!("error: {}", message);
            say(interpreter, &text);
            // Best effort: reset the child so the session can go on.
            child.call_stack.clear();
            child.stack.set_top(locals_bytesize);
        }
    }
}

fn disarm(interpreter: &mut Interpreter) {
    interpreter.pry = false;
    interpreter.pry_node = None;
    interpreter.pry_max_target_frame = None;
}

fn whereami_line(node: &Node) -> String {
    match node.loc() {
        Some(loc) => format!("From: {}\n\n    {}", loc, node.expr()),
        None => format!("From: ???\n\n    {}", node.expr()),
    }
}

fn read_line(interpreter: &mut Interpreter) -> Option<String> {
    let mut line = String::new();
    match interpreter.pry_io.as_mut() {
        Some(io) => {
            let _ = write!(io.output, "icr:pry> ");
            let _ = io.output.flush();
            match io.input.read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        }
        None => {
            eprint!("icr:pry> ");
            match std::io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        }
    }
}

fn say(interpreter: &mut Interpreter, text: &str) {
    match interpreter.pry_io.as_mut() {
        Some(io) => {
            let _ = writeln!(io.output, "{}", text);
        }
        None => eprintln!("{}", text),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown error".to_string()
    }
}
