//! Saturn DCPU-16 Emulator - CLI Entry Point
//!
//! Commands:
//! - `saturn-emu run <program>` - Run an assembly file or binary image
//! - `saturn-emu debug <program>` - Interactive debugger
//! - `saturn-emu asm <source>` - Assemble to a binary image
//! - `saturn-emu disasm <image>` - Disassemble a binary image
//! - `saturn-emu test` - Built-in self-test
//!
//! Every machine gets a clock (device 0), an M35FD floppy drive (device 1)
//! and a SPED-3 display (device 2).

use clap::{Args, Parser, Subcommand};
use saturn::asm::{load_image, save_image, Endian};
use saturn::{assemble, Clock, Cpu, CpuError, DeviceHandle, Display, Floppy, FloppyDisk};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "saturn-emu")]
#[command(version)]
#[command(about = "A DCPU-16 emulator with a floppy drive, clock and vector display")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct MachineArgs {
    /// Floppy disk image to insert into the M35FD
    #[arg(short, long)]
    disk: Option<PathBuf>,
    /// Insert the disk write-protected
    #[arg(short, long)]
    write_protected: bool,
    /// Read and write images as little-endian words
    #[arg(short, long)]
    little_endian: bool,
}

impl MachineArgs {
    fn endian(&self) -> Endian {
        if self.little_endian { Endian::Little } else { Endian::Big }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program for a number of cycles
    Run {
        /// Path to the assembly source (.asm, .dasm) or binary image
        program: PathBuf,
        /// Number of cycles to run
        #[arg(short, long, default_value = "100000")]
        max_cycles: u64,
        /// Log every executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the final machine state as JSON
        #[arg(long)]
        dump_state: bool,
        #[command(flatten)]
        machine: MachineArgs,
    },
    /// Interactive debugger
    Debug {
        /// Path to the assembly source or binary image
        program: PathBuf,
        #[command(flatten)]
        machine: MachineArgs,
    },
    /// Assemble source to a binary image
    Asm {
        /// Path to the source file
        source: PathBuf,
        /// Output image file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write little-endian words
        #[arg(short, long)]
        little_endian: bool,
    },
    /// Disassemble a binary image to readable text
    Disasm {
        /// Path to the image file
        image: PathBuf,
        /// Read little-endian words
        #[arg(short, long)]
        little_endian: bool,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, dump_state, machine }) => {
            init_tracing(trace);
            run_program(&program, max_cycles, dump_state, &machine);
        }
        Some(Commands::Debug { program, machine }) => {
            debug_program(&program, &machine);
        }
        Some(Commands::Asm { source, output, little_endian }) => {
            init_tracing(false);
            let endian = if little_endian { Endian::Little } else { Endian::Big };
            assemble_file(&source, output, endian);
        }
        Some(Commands::Disasm { image, little_endian }) => {
            init_tracing(false);
            let endian = if little_endian { Endian::Little } else { Endian::Big };
            disassemble_file(&image, endian);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("Saturn DCPU-16 Emulator v{}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// Log to stderr. `RUST_LOG` selects the filter unless tracing is forced.
fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

fn is_source(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("asm" | "dasm" | "dasm16" | "s")
    )
}

/// Assemble a source file or load a binary image.
fn load_program(path: &Path, endian: Endian) -> Vec<u16> {
    let words = if is_source(path) {
        let source = std::fs::read_to_string(path)
            .unwrap_or_else(|e| fail(format!("Failed to read {}: {}", path.display(), e)));
        let words = assemble(&source).unwrap_or_else(|e| fail(format!("Assembly error: {}", e)));
        println!("📝 Assembled {} words", words.len());
        words
    } else {
        let words = load_image(path, endian).unwrap_or_else(|e| fail(format!("Failed to load image: {}", e)));
        println!("📂 Loaded {} words", words.len());
        words
    };

    if words.is_empty() {
        fail("No program to execute");
    }
    words
}

/// A CPU with the program flashed and the standard devices attached.
fn build_machine(program: &[u16], machine: &MachineArgs) -> (Cpu, DeviceHandle<Floppy>) {
    let mut cpu = Cpu::new();
    cpu.flash(program).unwrap_or_else(|e| fail(format!("Failed to load program: {}", e)));

    cpu.attach_device(Clock::new());
    let floppy = match &machine.disk {
        Some(path) => {
            let image = load_image(path, machine.endian())
                .unwrap_or_else(|e| fail(format!("Failed to load disk: {}", e)));
            let disk = FloppyDisk::from_words(&image, machine.write_protected)
                .unwrap_or_else(|e| fail(format!("Failed to load disk: {}", e)));
            println!("💾 Inserted {}", path.display());
            Floppy::with_disk(disk)
        }
        None => Floppy::new(),
    };
    let floppy = cpu.attach_device(floppy);
    cpu.attach_device(Display::new());
    (cpu, floppy)
}

fn run_program(path: &Path, max_cycles: u64, dump_state: bool, machine: &MachineArgs) {
    println!("🔧 Running: {}", path.display());

    let program = load_program(path, machine.endian());
    let (mut cpu, floppy) = build_machine(&program, machine);

    let mut decode_errors = 0u64;
    let mut on_fire = None;
    for _ in 0..max_cycles {
        match cpu.cycle() {
            Ok(_) => {}
            Err(CpuError::Decode(_)) => decode_errors += 1,
            Err(e) => {
                on_fire = Some(e);
                break;
            }
        }
    }

    // Persist whatever the program wrote to a writable disk
    if let Some(disk_path) = &machine.disk {
        if !machine.write_protected {
            if let Some(disk) = cpu.device(floppy).and_then(Floppy::disk) {
                save_image(disk_path, disk.words(), machine.endian())
                    .unwrap_or_else(|e| fail(format!("Failed to save disk: {}", e)));
            }
        }
    }

    if dump_state {
        match serde_json::to_string_pretty(&cpu.snapshot()) {
            Ok(json) => println!("{}", json),
            Err(e) => fail(format!("Failed to serialize state: {}", e)),
        }
    } else {
        println!();
        println!("━━━ Result ━━━");
        println!("Cycles: {}", cpu.cycles);
        println!("State: {:?}", cpu.state);
        println!("{:?}", cpu.regs);
        println!("Pending interrupts: {}", cpu.pending_interrupts().count());
        if decode_errors > 0 {
            println!("⚠️  Skipped {} reserved opcodes", decode_errors);
        }
    }

    if let Some(e) = on_fire {
        fail(e);
    }
}

fn debug_program(path: &Path, machine: &MachineArgs) {
    println!("🔍 Loading: {}", path.display());

    let program = load_program(path, machine.endian());
    let (cpu, _) = build_machine(&program, machine);

    #[cfg(feature = "tui")]
    {
        println!("🚀 Launching debugger...");
        if let Err(e) = saturn::tui::run_debugger(cpu, program) {
            fail(format!("Debugger error: {}", e));
        }
    }

    #[cfg(not(feature = "tui"))]
    {
        let _ = (cpu, program);
        fail("This build has no debugger; enable the `tui` feature");
    }
}

fn assemble_file(source_path: &Path, output: Option<PathBuf>, endian: Endian) {
    let out_path = output.unwrap_or_else(|| source_path.with_extension("bin"));

    println!("📝 Assembling: {} → {}", source_path.display(), out_path.display());

    let source = std::fs::read_to_string(source_path)
        .unwrap_or_else(|e| fail(format!("Failed to read file: {}", e)));
    let words = assemble(&source).unwrap_or_else(|e| fail(format!("Assembly error: {}", e)));

    println!("✓ Assembled {} words", words.len());

    if let Err(e) = save_image(&out_path, &words, endian) {
        fail(format!("Failed to save image: {}", e));
    }

    println!("✓ Saved to {}", out_path.display());
}

fn disassemble_file(image_path: &Path, endian: Endian) {
    use saturn::asm::disassemble;

    println!("📖 Disassembling: {}", image_path.display());
    println!();

    let words = load_image(image_path, endian).unwrap_or_else(|e| fail(format!("Failed to load image: {}", e)));
    println!("{}", disassemble(&words));
}

fn run_self_test() {
    println!("━━━ Saturn Self-Test ━━━");
    println!();

    let checks: [(&str, fn() -> Result<(), String>); 4] = [
        ("Arithmetic and EX", check_arithmetic),
        ("Interrupt round trip", check_interrupts),
        ("Clock ticks", check_clock),
        ("Floppy sector copy", check_floppy),
    ];

    let mut failed = 0;
    for (name, check) in checks {
        match check() {
            Ok(()) => println!("{}... ✓", name),
            Err(e) => {
                println!("{}... ✗ ({})", name, e);
                failed += 1;
            }
        }
    }

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", checks.len() - failed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}

fn machine_for(source: &str) -> Result<Cpu, String> {
    let program = assemble(source).map_err(|e| e.to_string())?;
    let mut cpu = Cpu::new();
    cpu.flash(&program).map_err(|e| e.to_string())?;
    Ok(cpu)
}

fn check_arithmetic() -> Result<(), String> {
    let mut cpu = machine_for("SET A, 0xffff\nADD A, 2\nSET B, EX")?;
    cpu.run_cycles(4).map_err(|e| e.to_string())?;
    if (cpu.regs.a, cpu.regs.b) == (1, 1) {
        Ok(())
    } else {
        Err(format!("A={:#06x} B={:#06x}, expected 0x0001 0x0001", cpu.regs.a, cpu.regs.b))
    }
}

fn check_interrupts() -> Result<(), String> {
    let source = "
        IAS handler
        INT 0x42
        :halt SET PC, halt
        :handler SET B, A
        RFI 0
    ";
    let mut cpu = machine_for(source)?;
    cpu.run_cycles(30).map_err(|e| e.to_string())?;
    if cpu.regs.b == 0x42 && !cpu.is_queueing() {
        Ok(())
    } else {
        Err(format!("B={:#06x}, expected 0x0042", cpu.regs.b))
    }
}

fn check_clock() -> Result<(), String> {
    let source = "
        SET A, 0
        SET X, 10
        HWI 0
        :wait SET PC, wait
    ";
    let mut cpu = machine_for(source)?;
    let clock = cpu.attach_device(Clock::new());
    cpu.run_cycles(105).map_err(|e| e.to_string())?;
    let ticks = cpu.device(clock).map(Clock::ticks).unwrap_or(0);
    if ticks >= 9 {
        Ok(())
    } else {
        Err(format!("{} ticks, expected at least 9", ticks))
    }
}

fn check_floppy() -> Result<(), String> {
    let source = "
        SET A, 3
        SET X, 7
        SET Y, data
        HWI 0
        :halt SET PC, halt
        :data DAT 0xcafe
    ";
    let mut cpu = machine_for(source)?;
    let floppy = cpu.attach_device(Floppy::with_disk(FloppyDisk::blank(false)));
    cpu.run_cycles(20).map_err(|e| e.to_string())?;
    let word = cpu
        .device(floppy)
        .and_then(Floppy::disk)
        .and_then(|d| d.sector(7))
        .map(|s| s[0]);
    if word == Some(0xcafe) {
        Ok(())
    } else {
        Err(format!("sector 7 starts with {:?}, expected 0xcafe", word))
    }
}
