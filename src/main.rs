//! Entry point: parses the CLI surface, loads configuration and images,
//! brings up the UART thread, and runs the scheduler/interpreter loop.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use neocore_emu::config::{load_memory_config, PageType};
use neocore_emu::cpu::{CpuState, StepOutcome};
use neocore_emu::interrupts::{InterruptQueue, InterruptVectorTable};
use neocore_emu::loader::{load_boot_image, load_flash_image};
use neocore_emu::scheduler::Scheduler;
use neocore_emu::uart::Uart;

const TIME_SLOT: u32 = 1000;
const DEFAULT_BAUD_RATE: u32 = 9600;

struct Args {
    boot_image: Option<PathBuf>,
    flash_image: Option<PathBuf>,
    config: Option<PathBuf>,
    help: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        boot_image: None,
        flash_image: None,
        config: None,
        help: false,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-i" => {
                args.boot_image = Some(PathBuf::from(
                    it.next().context("-i requires a path argument")?,
                ));
            }
            "-m" => {
                args.flash_image = Some(PathBuf::from(
                    it.next().context("-m requires a path argument")?,
                ));
            }
            "-c" => {
                args.config = Some(PathBuf::from(
                    it.next().context("-c requires a path argument")?,
                ));
            }
            "-h" => args.help = true,
            other => bail!("unrecognized argument: {other}"),
        }
    }
    Ok(args)
}

fn print_help() {
    eprintln!(
        "usage: neocore-emu -c <memory.ini> -i <boot.bin> [-m <flash.bin>]\n\
         \n\
         -i <file>   program/boot image, copied into BOOT_SECTOR\n\
         -m <file>   flash image, chunked into 4 KiB blocks\n\
         -c <file>   memory map (INI)\n\
         -h          print this message"
    );
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();
}

fn run() -> Result<()> {
    let args = parse_args()?;
    if args.help {
        print_help();
        return Ok(());
    }

    init_tracing();

    let config_path = args.config.context("missing required -c <memory.ini>")?;
    let config = load_memory_config(&config_path)
        .with_context(|| format!("loading memory config from {}", config_path.display()))?;

    let irq_queue = Arc::new(InterruptQueue::new());
    let vector_table = Arc::new(InterruptVectorTable::new());
    let uart_handle = Uart::spawn(DEFAULT_BAUD_RATE, irq_queue.clone())
        .context("bringing up UART PTY")?;
    tracing::info!(slave = %uart_handle.slave_path.display(), "connect a terminal here to talk to the emulated UART");

    let mut cpu = CpuState::new(config.clone(), irq_queue, vector_table, uart_handle.uart.clone());

    if let Some(boot_path) = &args.boot_image {
        let boot_start = config
            .section_of_type(PageType::BootSector)
            .map(|s| s.start_address)
            .unwrap_or(0);
        load_boot_image(&mut cpu.bus, boot_path, boot_start)
            .with_context(|| format!("loading boot image {}", boot_path.display()))?;
    }

    if let Some(flash_path) = &args.flash_image {
        let flash_start = config
            .section_of_type(PageType::Flash)
            .map(|s| s.start_address)
            .context("flash image given but no flash section in memory config")?;
        load_flash_image(&mut cpu.bus, flash_path, flash_start)
            .with_context(|| format!("loading flash image {}", flash_path.display()))?;
    }

    let mut scheduler = Scheduler::new(TIME_SLOT);
    cpu.interrupts_enabled = true;

    loop {
        let Some(task) = scheduler.head() else {
            tracing::info!("no runnable tasks left, exiting");
            break;
        };
        cpu.set_pc(task.program_counter);
        cpu.resume();

        let outcome = cpu.step();
        let (halted, task_pc) = (matches!(outcome, StepOutcome::Halted), cpu.pc());

        if let StepOutcome::IllegalOpcode(opcode) = outcome {
            tracing::error!(opcode, "task terminated on illegal opcode");
        }

        if let Some(task) = scheduler.head_mut() {
            task.program_counter = task_pc;
        }
        scheduler.record_step(halted, false);

        if scheduler.task_count() == 0 {
            break;
        }
    }

    uart_handle.join();
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
