//! Command-line runner for the 68k translator.
//!
//! Either loads a JSON machine description or a raw binary into flat RAM,
//! runs it for a number of cycles in frames and prints the final register
//! state. Set `RUST_LOG=debug` (or `trace` for per-instruction listings)
//! to watch the translator.

mod machine;

use std::path::{Path, PathBuf};
use std::process;

use m68k_inst::{CpuModel, MAX_INSTRUCTION_WORDS, decode};
use m68k_jit::{Backend, BreakpointAction, CpuContext, JitConfig, RegisterAssignment};

use crate::machine::{Machine, RunnerError};

struct CliArgs {
    machine_path: Option<PathBuf>,
    image_path: Option<PathBuf>,
    base: u32,
    ram_size: u32,
    model: CpuModel,
    context_registers: bool,
    native: bool,
    cycles: Option<u64>,
    disasm: Option<(u32, usize)>,
    state_path: Option<PathBuf>,
}

fn print_usage_and_exit(code: i32) -> ! {
    eprintln!("Usage: m68k-runner <machine.json> [options]");
    eprintln!("       m68k-runner --image <file.bin> [--base <addr>] [--ram <bytes>] [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --model <68000|68010|68020>  CPU model for --image (default 68000)");
    eprintln!("  --context-registers          keep every guest register in the context");
    eprintln!("  --native                     run x86-64 machine code instead of the executor");
    eprintln!("  --cycles <n>                 cycles to run (overrides the description)");
    eprintln!("  --disasm <addr> <count>      list instructions instead of running");
    eprintln!("  --save-state <file>          write a register snapshot after the run");
    process::exit(code);
}

/// Decimal, `0x` or `$` prefixed hex.
fn parse_number(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix('$')) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn parse_model(text: &str) -> Option<CpuModel> {
    match text {
        "68000" | "68k" => Some(CpuModel::M68000),
        "68010" => Some(CpuModel::M68010),
        "68020" => Some(CpuModel::M68020),
        _ => None,
    }
}

fn number_arg(args: &[String], i: usize, flag: &str) -> u64 {
    let Some(value) = args.get(i) else {
        eprintln!("Missing value for {flag}");
        print_usage_and_exit(1);
    };
    parse_number(value).unwrap_or_else(|| {
        eprintln!("Invalid number for {flag}: {value}");
        print_usage_and_exit(1);
    })
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        machine_path: None,
        image_path: None,
        base: 0x1000,
        ram_size: 0x10_0000,
        model: CpuModel::M68000,
        context_registers: false,
        native: false,
        cycles: None,
        disasm: None,
        state_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--image" => {
                i += 1;
                cli.image_path = args.get(i).map(PathBuf::from);
            }
            "--base" => {
                i += 1;
                cli.base = number_arg(&args, i, "--base") as u32;
            }
            "--ram" => {
                i += 1;
                cli.ram_size = number_arg(&args, i, "--ram") as u32;
            }
            "--model" => {
                i += 1;
                let Some(model) = args.get(i).and_then(|value| parse_model(value)) else {
                    eprintln!("Expected 68000, 68010 or 68020 after --model");
                    print_usage_and_exit(1);
                };
                cli.model = model;
            }
            "--context-registers" => {
                cli.context_registers = true;
            }
            "--native" => {
                cli.native = true;
            }
            "--cycles" => {
                i += 1;
                cli.cycles = Some(number_arg(&args, i, "--cycles"));
            }
            "--disasm" => {
                let address = number_arg(&args, i + 1, "--disasm") as u32;
                let count = number_arg(&args, i + 2, "--disasm") as usize;
                cli.disasm = Some((address, count));
                i += 2;
            }
            "--save-state" => {
                i += 1;
                cli.state_path = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => print_usage_and_exit(0),
            other if other.starts_with("--") => {
                eprintln!("Unknown option: {other}");
                print_usage_and_exit(1);
            }
            other => {
                cli.machine_path = Some(PathBuf::from(other));
            }
        }
        i += 1;
    }

    if cli.machine_path.is_none() && cli.image_path.is_none() {
        print_usage_and_exit(1);
    }
    cli
}

fn load_machine(cli: &CliArgs) -> Result<(Machine, PathBuf), RunnerError> {
    let (mut machine, dir) = match &cli.machine_path {
        Some(path) => {
            let dir = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
            (Machine::load(path)?, dir)
        }
        None => {
            let config = JitConfig {
                model: cli.model,
                ..JitConfig::default()
            };
            let image = cli.image_path.clone().unwrap_or_default();
            (Machine::flat(config, image, cli.base, cli.ram_size), PathBuf::new())
        }
    };
    if let Some(cycles) = cli.cycles {
        machine.cycles = cycles;
    }
    if cli.context_registers {
        machine.config.register_assignment = RegisterAssignment::Context;
    }
    if cli.native {
        machine.config.backend = Backend::Native;
    }
    Ok((machine, dir))
}

fn disassemble(cpu: &CpuContext, mut address: u32, count: usize) {
    let model = cpu.model();
    let mut words = [0u16; MAX_INSTRUCTION_WORDS];
    for _ in 0..count {
        let fetched = cpu.memory().fetch_words(address, &mut words);
        if fetched == 0 {
            println!("${address:06X}  <no code memory>");
            return;
        }
        let inst = decode(&words[..fetched], address, model);
        let hex: Vec<String> = words[..usize::from(inst.length / 2).min(fetched)]
            .iter()
            .map(|word| format!("{word:04X}"))
            .collect();
        println!("${address:06X}  {:<24}  {inst}", hex.join(" "));
        address = address.wrapping_add(u32::from(inst.length));
    }
}

fn print_registers(cpu: &CpuContext) {
    for n in 0..8 {
        println!("D{n} ${:08X}   A{n} ${:08X}", cpu.d(n), cpu.a(n));
    }
    println!("PC ${:08X}   SR ${:04X}   SP' ${:08X}", cpu.pc(), cpu.sr(), cpu.inactive_sp());
    let stats = cpu.stats();
    println!(
        "cycle {}  blocks {}  instructions {}  retranslations {}  exceptions {}  interrupts {}",
        cpu.current_cycle(),
        stats.blocks_translated,
        stats.instructions_translated,
        stats.retranslations,
        stats.exceptions,
        stats.interrupts
    );
}

/// Run in frames, rebasing the cycle counter after each so that it never
/// wraps.
fn run(machine: &Machine, cpu: &mut CpuContext) -> Result<u64, RunnerError> {
    let frame = machine.frame_cycles.max(1);
    let mut total = 0u64;
    while total < machine.cycles {
        let remaining = (machine.cycles - total).min(u64::from(frame)) as u32;
        if let Some(interrupt) = machine.frame_interrupt {
            cpu.set_interrupt(interrupt.level, interrupt.cycle);
        }
        cpu.run_until(remaining)?;
        let reached = cpu.current_cycle();
        if reached < remaining {
            // a breakpoint or device asked to stop
            log::info!("stopped early at ${:08X}", cpu.pc());
            total += u64::from(reached);
            break;
        }
        cpu.adjust_cycles(remaining);
        total += u64::from(remaining);
    }
    Ok(total)
}

fn main() {
    env_logger::init();
    let cli = parse_args();

    let (machine, dir) = load_machine(&cli).unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(1);
    });
    let mut cpu = machine.build(&dir).unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(1);
    });

    if let Some((address, count)) = cli.disasm {
        disassemble(&cpu, address, count);
        return;
    }

    for &address in &machine.breakpoints {
        cpu.insert_breakpoint(address, |hit| {
            println!("breakpoint ${hit:06X}");
            BreakpointAction::Stop
        });
    }

    match run(&machine, &mut cpu) {
        Ok(cycles) => log::info!("ran {cycles} cycles"),
        Err(err) => {
            eprintln!("{err}");
            print_registers(&cpu);
            process::exit(1);
        }
    }
    print_registers(&cpu);

    if let Some(path) = &cli.state_path {
        if let Err(source) = std::fs::write(path, cpu.serialize_state()) {
            eprintln!("{}", RunnerError::Io { path: path.clone(), source });
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex_prefixes() {
        assert_eq!(parse_number("4096"), Some(4096));
        assert_eq!(parse_number("0x1000"), Some(0x1000));
        assert_eq!(parse_number("$FF"), Some(0xFF));
        assert_eq!(parse_number("zz"), None);
    }

    #[test]
    fn model_names() {
        assert_eq!(parse_model("68010"), Some(CpuModel::M68010));
        assert_eq!(parse_model("68030"), None);
    }
}
