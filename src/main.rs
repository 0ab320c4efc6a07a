//! # kv-sweep - Main Entry Point
//!
//! Dispatches the two roles of a benchmark session:
//!
//! - `kv-sweep driver <client_host> <server_host>` on the client host
//! - `kv-sweep controller <host>` on the server host
//!
//! Start the Controller first; the Driver connects to it, runs the whole
//! sweep, and sends `END`. Both sides exit non-zero if the session is cut
//! short. Ctrl-C ends the session immediately; any live server or client
//! process is killed when its handle is dropped.

use anyhow::Result;
use clap::Parser;
use kv_sweep::{
    cli::{Args, Command, ControllerArgs, DriverArgs},
    logging::init_logging,
    protocol::WireFormat,
    utils::{format_bytes, format_duration, print_table_row, print_table_separator},
    ControlListener, Controller, Driver, LocalSupervisor, ProcessClientRunner, SessionRecorder,
    TcpControlChannel, TestCase,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file appender flushes
    let _log_guard = init_logging(args.verbose, args.log_file.as_deref())?;

    info!("kv-sweep {}", kv_sweep::VERSION);

    match args.command {
        Command::Driver(driver_args) => run_driver(driver_args, args.format).await,
        Command::Controller(controller_args) => run_controller(controller_args, args.format).await,
    }
}

async fn run_driver(args: DriverArgs, format: WireFormat) -> Result<()> {
    args.validate()?;
    let campaign = args.campaign()?;
    let cases = campaign.test_cases()?;

    if args.plan {
        print_plan(&cases);
        return Ok(());
    }

    info!(
        "Configuration: {} test case(s), client {:?}, controller {} ({} format)",
        cases.len(),
        args.client,
        args.control_address(),
        format
    );

    let runner = ProcessClientRunner::new(&args.client, &args.client_host, &args.server_host);
    let mut driver = Driver::new(args.driver_config(), runner);
    if let Some(report) = &args.report {
        driver = driver.with_recorder(SessionRecorder::create(report)?);
    }

    let mut channel = TcpControlChannel::connect(args.control_address(), format).await?;

    tokio::select! {
        result = driver.run(&mut channel, &cases) => {
            let summary = result?;
            if summary.client_failures > 0 {
                warn!(
                    "{} of {} client run(s) exited unsuccessfully",
                    summary.client_failures, summary.completed_cases
                );
            }
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Interrupted; sweep abandoned");
        }
    }
}

async fn run_controller(args: ControllerArgs, format: WireFormat) -> Result<()> {
    args.validate()?;

    let listener = ControlListener::bind(args.listen_address(), format).await?;
    let supervisor = LocalSupervisor::new(args.readiness_probe());
    let mut controller = Controller::new(args.controller_config(), supervisor);
    info!(
        "Controller on {} ({} format), readiness probe {:?}",
        args.listen_address(),
        format,
        controller.supervisor().probe()
    );

    tokio::select! {
        result = controller.serve(&listener) => {
            let stats = result?;
            info!(
                "Session complete: {} server(s) started, {} force-killed",
                stats.servers_started, stats.servers_killed
            );
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Interrupted; live server terminated");
        }
    }
}

/// Print the sweep as a table.
fn print_plan(cases: &[TestCase]) {
    let widths = [4, 10, 9, 9, 7, 10, 10, 10, 9, 28];
    print_table_separator(&widths);
    print_table_row(
        &[
            "#", "Workload", "Key", "Value", "Threads", "Puts", "Gets", "Deletes", "Min time",
            "Output",
        ],
        &widths,
    );
    print_table_separator(&widths);
    for (index, case) in cases.iter().enumerate() {
        let output = case.output().display().to_string();
        print_table_row(
            &[
                &(index + 1).to_string(),
                &case.workload().to_string(),
                &format_bytes(case.key_size()),
                &format_bytes(case.value_size()),
                &case.threads().to_string(),
                &case.puts().to_string(),
                &case.gets().to_string(),
                &case.deletes().to_string(),
                &format_duration(case.min_duration()),
                &output,
            ],
            &widths,
        );
    }
    print_table_separator(&widths);
    println!("{} test case(s)", cases.len());
}
