use std::fs;
use std::io::{IsTerminal, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};

use miniasm::env::{self, TraceLevel};
use miniasm::output::{Condition, Output};
use miniasm::{parse_hex, Air, AsmParser, Instruction, Machine, Status, CODE_START, INSTR_WIDTH};

/// MiniASM assembles and runs programs for a small 16-bit teaching machine.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or hex `.hex` file and print the final machine state
    Run {
        /// `.asm` or `.hex` file to run
        name: PathBuf,
        /// Characters available to `READ`. Piped stdin is used if absent
        #[arg(short, long)]
        input: Option<String>,
        /// Print every machine event to stderr
        #[arg(short, long)]
        trace: bool,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Create hex `.hex` file to run later
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output .hex file
        dest: Option<PathBuf>,
    },
    /// Check a `.asm` file without running or outputting hex
    Check {
        /// File to check
        name: PathBuf,
        /// Print each instruction with its address, encoding and source line
        #[arg(short, long)]
        listing: bool,
    },
    /// Print the instructions encoded in a `.hex` file
    Disasm {
        /// `.hex` file to decode
        name: PathBuf,
    },
    /// Place a watch on a `.asm` file to receive constant assembler updates
    Watch {
        /// `.asm` file to watch
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(miniasm::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run {
                name,
                input,
                trace,
                minimal,
            } => run(&name, input, trace, minimal),
            Command::Compile { name, dest } => {
                file_message(Green, "Assembling", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let hex = miniasm::assemble_hex(&contents)?;

                let out_file_name = match dest {
                    Some(dest) => dest,
                    None => hex_file_name(&name)?,
                };
                fs::write(&out_file_name, format!("{hex}\n")).into_diagnostic()?;

                message(Green, "Finished", "emit hex");
                file_message(Green, "Saved", &out_file_name);
                Ok(())
            }
            Command::Check { name, listing } => {
                file_message(Green, "Checking", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let air = AsmParser::new(&contents).parse()?;
                if listing {
                    print_listing(&contents, &air);
                }
                message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Disasm { name } => {
                let words = read_hex(&name)?;
                let mut addr = CODE_START;
                for word in words {
                    let text = match Instruction::decode(word) {
                        Ok(instr) => instr.to_string(),
                        Err(opcode) => format!("??? (opcode 0b{opcode:06b})"),
                    };
                    println!("{addr:>4}  {word:04x}  {text}");
                    addr += INSTR_WIDTH;
                }
                Ok(())
            }
            Command::Watch { name } => {
                if !name.exists() {
                    bail!("File does not exist. Exiting...")
                }
                // Vim breaks if watching a single file
                let folder_path = match name.parent() {
                    Some(pth) if pth.is_dir() => pth.to_path_buf(),
                    _ => Path::new(".").to_path_buf(),
                };

                // Clear screen and move cursor to top left
                print!("\x1B[2J\x1B[2;1H");
                file_message(Green, "Watching", &name);
                message(Cyan, "Help", "press CTRL+C to exit");

                let mut watcher = Hotwatch::new_with_custom_delay(Duration::from_millis(500))
                    .into_diagnostic()?;

                watcher
                    .watch(folder_path, move |event: Event| match event.kind {
                        // Watch remove for vim changes
                        EventKind::Modify(_) | EventKind::Remove(_) => {
                            print!("\x1B[2J\x1B[2;1H");
                            file_message(Green, "Watching", &name);
                            message(Green, "Re-checking", "file change detected");
                            message(Cyan, "Help", "press CTRL+C to exit");

                            // Makes reruns more obvious
                            sleep(Duration::from_millis(50));

                            let contents = match fs::read_to_string(&name) {
                                Ok(cts) => cts,
                                Err(e) => {
                                    eprintln!("{e}. Exiting...");
                                    std::process::exit(1)
                                }
                            };
                            match miniasm::assemble(&contents) {
                                Ok(words) => {
                                    let right = format!("{} instructions", words.len());
                                    message(Green, "Success", right.as_str());
                                }
                                Err(e) => {
                                    println!("\n{:?}", miette::Report::new(e));
                                }
                            }
                            Flow::Continue
                        }
                        _ => Flow::Continue,
                    })
                    .into_diagnostic()?;
                watcher.run();
                Ok(())
            }
        }
    } else if let Some(path) = args.path {
        run(&path, None, false, false)
    } else {
        println!("\n~ miniasm v{VERSION} ~");
        println!("{}", LOGO.cyan().bold());
        println!("{SHORT_INFO}");
        Ok(())
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &Path, input: Option<String>, trace: bool, minimal: bool) -> Result<()> {
    Output::set_minimal(minimal || env::is_minimal());

    let words = match name.extension().and_then(|ext| ext.to_str()) {
        Some("asm") => {
            file_message(MsgColor::Green, "Assembling", name);
            let contents = fs::read_to_string(name).into_diagnostic()?;
            miniasm::assemble(&contents)?
        }
        Some("hex") => {
            file_message(MsgColor::Green, "Loading", name);
            read_hex(name)?
        }
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    };

    let mut machine = Machine::new();
    machine.load_words(&words)?;

    let input = match input {
        Some(input) => input,
        None if !std::io::stdin().is_terminal() => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).into_diagnostic()?;
            buf
        }
        None => String::new(),
    };
    machine.push_input(&input);

    let level = if trace {
        TraceLevel::All
    } else {
        env::trace_level()
    };
    if level != TraceLevel::Off {
        Output::Trace(Condition::Sometimes).print_str("── machine events ──\n");
        machine.subscribe(move |event| {
            if level.admits(event) {
                Output::Trace(Condition::Always).print_event(event);
            }
        });
    }

    message(MsgColor::Green, "Running", &format!("{} instructions", words.len()));
    let status = machine.run();

    Output::Normal.print_str(&machine.output());
    Output::Normal.start_new_line();

    match status {
        Status::Failure(fault) => {
            Output::Normal.print_registers(&machine);
            Err(fault.into())
        }
        Status::Breakpoint | Status::Paused => {
            message(MsgColor::Cyan, "Stopped", &status.message());
            Output::Normal.print_registers(&machine);
            Ok(())
        }
        Status::Success | Status::InProgress => {
            message(MsgColor::Green, "Halted", &status.message());
            Output::Normal.print_registers(&machine);
            file_message(MsgColor::Green, "Completed", name);
            Ok(())
        }
    }
}

/// Address, encoding, line number and source text of every instruction, then the labels.
fn print_listing(src: &str, air: &Air) {
    for stmt in air {
        let text = &src[Range::from(stmt.span)];
        println!("{:>4}  {:04x}  {:>4} | {}", stmt.addr, stmt.emit(), stmt.line, text);
    }
    if !air.labels().is_empty() {
        println!();
        for (name, addr) in air.labels().iter() {
            println!("{addr:>4}  {name}:");
        }
    }
}

fn read_hex(name: &Path) -> Result<Vec<u16>> {
    let contents = fs::read_to_string(name).into_diagnostic()?;
    Ok(parse_hex(contents.trim())?)
}

fn hex_file_name(name: &Path) -> Result<PathBuf> {
    match name.with_extension("hex").file_name() {
        Some(file_name) => Ok(file_name.into()),
        None => bail!("File has no name. Exiting..."),
    }
}

const LOGO: &str = r#"
           _       _
 _ __ ___ (_)_ __ (_) __ _ ___ _ __ ___
| '_ ` _ \| | '_ \| |/ _` / __| '_ ` _ \
| | | | | | | | | | | (_| \__ \ | | | | |
|_| |_| |_|_|_| |_|_|\__,_|___/_| |_| |_|"#;

const SHORT_INFO: &str = r"
Welcome to miniasm, an assembler and virtual machine for a small
16-bit instruction set with 32 registers and 1 KiB of memory.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
