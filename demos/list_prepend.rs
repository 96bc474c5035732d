//! Fixpoint of a loop prepending nodes to a singly linked list.
//!
//! ```text
//! x = y = new; x.next = null;
//! while (*) { n = new; n.next = y; y = n; }
//! ```
//!
//! Run with:
//! ```bash
//! cargo run --example list_prepend -- --kind abs
//! ```

use std::rc::Rc;

use clap::{Parser, ValueEnum};

use fa_rs::boxman::BoxMan;
use fa_rs::config::{AnalysisConfig, MatchMode};
use fa_rs::data::{Data, SelData};
use fa_rs::fixpoint::{Fixpoint, FixpointKind, Verdict};
use fa_rs::forest::Fae;

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Kind {
    Fix,
    Abs,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Mode {
    Exact,
    Smart,
    Smarter,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Fixpoint of a list-building loop")]
struct Cli {
    /// Fixpoint flavour at the loop head.
    #[arg(long, value_enum, default_value = "abs")]
    kind: Kind,

    /// Transition matching of the height abstraction.
    #[arg(long, value_enum, default_value = "smart")]
    mode: Mode,

    /// Height of the abstraction.
    #[arg(long, value_name = "INT", default_value = "1")]
    height: usize,

    /// Maximum number of loop iterations.
    #[arg(long, value_name = "INT", default_value = "10")]
    iterations: usize,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let kind = match args.kind {
        Kind::Fix => FixpointKind::Fix,
        Kind::Abs => FixpointKind::Abs,
    };
    let config = AnalysisConfig {
        abstraction_height: args.height,
        match_mode: match args.mode {
            Mode::Exact => MatchMode::Exact,
            Mode::Smart => MatchMode::Smart,
            Mode::Smarter => MatchMode::Smarter,
        },
        ..AnalysisConfig::default()
    };

    let boxman = Rc::new(BoxMan::default());
    let sels = [SelData::new(0, 8, 0, "next")];

    let mut fae = Fae::new(boxman.clone());
    let tail = fae.node_create(&sels, None);
    fae.node_modify(tail, 0, Data::null())?;
    fae.var_push(Data::reference(tail));
    fae.var_push(Data::reference(tail));

    let mut fixpoint = Fixpoint::new(kind, boxman.clone(), config);
    let mut converged = false;
    for i in 0..args.iterations {
        match fixpoint.execute(&fae)? {
            Verdict::Hit => {
                println!("Fixpoint reached after {} iterations", i);
                converged = true;
                break;
            }
            Verdict::Extended(next) => {
                fae = next;
            }
        }

        let y = fae.var_get(1).clone();
        let n = fae.node_create(&sels, None);
        fae.node_modify(n, 0, y)?;
        fae.var_set(1, Data::reference(n));
    }
    if !converged {
        println!("No fixpoint within {} iterations", args.iterations);
    }

    println!("{}", fae.dump_state()?);
    println!("{}", boxman.dump_boxes()?);
    println!("fwd_conf: {} transitions", fixpoint.fwd_conf().len());

    let time_total = time_total.elapsed();
    println!("\nAll done in {:.3} s", time_total.as_secs_f64());

    Ok(())
}
