use anyhow::{bail, Context};
use clap::{crate_description, crate_name, crate_version, value_parser, Arg, ArgAction, Command};

use bowfin::map::{AlignmentParameters, ReportMode};

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    let matches = Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("v")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            Command::new("index")
                .about("Creates the index files of a reference genome")
                .arg(
                    Arg::new("reference")
                        .required(true)
                        .long("reference")
                        .help("FASTA file containing the genome to be indexed")
                        .value_name("FASTA file"),
                ),
        )
        .subcommand(
            Command::new("map")
                .about("Maps reads against an indexed reference and writes SAM output")
                .arg(
                    Arg::new("reads")
                        .required(true)
                        .long("reads")
                        .help("FASTQ or FASTA file containing adapter-trimmed and quality-controlled reads")
                        .value_name("FASTQ/FASTA file"),
                )
                .arg(
                    Arg::new("reference")
                        .required(true)
                        .long("reference")
                        .help("Path prefix of the index files (the FASTA file used for indexing)")
                        .value_name("index prefix"),
                )
                .arg(
                    Arg::new("output")
                        .required(true)
                        .long("output")
                        .short('o')
                        .help("Output file for the aligned reads")
                        .value_name("SAM file"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite the output file if it exists"),
                )
                .arg(
                    Arg::new("max_edit_distance")
                        .short('k')
                        .long("edits")
                        .value_parser(value_parser!(u8).range(0..=8))
                        .default_value("3")
                        .help("Maximum number of edits per read"),
                )
                .arg(
                    Arg::new("mismatch_penalty")
                        .short('M')
                        .long("mismatch-penalty")
                        .value_parser(value_parser!(u16))
                        .default_value("3")
                        .help("Penalty for a mismatch"),
                )
                .arg(
                    Arg::new("gap_open_penalty")
                        .short('O')
                        .long("gap-open")
                        .value_parser(value_parser!(u16))
                        .default_value("11")
                        .help("Penalty for opening a gap"),
                )
                .arg(
                    Arg::new("gap_extension_penalty")
                        .short('E')
                        .long("gap-extend")
                        .value_parser(value_parser!(u16))
                        .default_value("4")
                        .help("Penalty for extending a gap"),
                )
                .arg(
                    Arg::new("split_open_penalty")
                        .long("split-open")
                        .value_parser(value_parser!(u16))
                        .default_value("0")
                        .help("Penalty for switching the extension direction"),
                )
                .arg(
                    Arg::new("indel_end_skip")
                        .long("indel-end-skip")
                        .value_parser(value_parser!(u8))
                        .default_value("5")
                        .help("Suppress indels within this many bases of the read ends"),
                )
                .arg(
                    Arg::new("band_width")
                        .long("band-width")
                        .value_parser(value_parser!(u8))
                        .default_value("16")
                        .help("Band width of the verification aligner"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .value_parser(["best", "all", "top"])
                        .default_value("best")
                        .help("Which hits to report per read"),
                )
                .arg(
                    Arg::new("num_alternatives")
                        .short('L')
                        .long("num-alternatives")
                        .value_parser(value_parser!(u32))
                        .default_value("5")
                        .help("Number of alternative hits with \"--report top\""),
                )
                .arg(
                    Arg::new("chunk_size")
                        .long("batch-size")
                        .value_parser(value_parser!(usize))
                        .default_value("250000")
                        .help("The number of reads that are processed in parallel"),
                )
                .arg(
                    Arg::new("max_expanded_states")
                        .long("max-states")
                        .value_parser(value_parser!(u32))
                        .default_value("1000000")
                        .help("Upper bound on search states expanded per read"),
                ),
        )
        .get_matches();

    simple_logger::init_with_level(match matches.get_count("v") {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    })?;

    match matches.subcommand() {
        Some(("index", index_matches)) => {
            let reference = index_matches
                .get_one::<String>("reference")
                .expect("argument is required");
            bowfin::index::indexing::run(reference)
                .with_context(|| format!("Could not index \"{reference}\""))?;
        }
        Some(("map", map_matches)) => {
            let report_mode = match map_matches
                .get_one::<String>("report")
                .expect("argument has a default")
                .as_str()
            {
                "best" => ReportMode::BestHit,
                "all" => ReportMode::AllHits,
                "top" => ReportMode::TopL(
                    *map_matches
                        .get_one::<u32>("num_alternatives")
                        .expect("argument has a default"),
                ),
                _ => unreachable!("clap validates the possible values"),
            };
            let alignment_parameters = AlignmentParameters {
                max_edit_distance: *map_matches
                    .get_one::<u8>("max_edit_distance")
                    .expect("argument has a default"),
                match_score: 0,
                mismatch_penalty: -i32::from(
                    *map_matches
                        .get_one::<u16>("mismatch_penalty")
                        .expect("argument has a default"),
                ),
                gap_open_penalty: -i32::from(
                    *map_matches
                        .get_one::<u16>("gap_open_penalty")
                        .expect("argument has a default"),
                ),
                gap_extension_penalty: -i32::from(
                    *map_matches
                        .get_one::<u16>("gap_extension_penalty")
                        .expect("argument has a default"),
                ),
                split_open_penalty: -i32::from(
                    *map_matches
                        .get_one::<u16>("split_open_penalty")
                        .expect("argument has a default"),
                ),
                indel_end_skip: *map_matches
                    .get_one::<u8>("indel_end_skip")
                    .expect("argument has a default"),
                band_width: *map_matches
                    .get_one::<u8>("band_width")
                    .expect("argument has a default"),
                report_mode,
                chunk_size: *map_matches
                    .get_one::<usize>("chunk_size")
                    .expect("argument has a default"),
                max_expanded_states: *map_matches
                    .get_one::<u32>("max_expanded_states")
                    .expect("argument has a default"),
            };
            bowfin::map::mapping::run(
                map_matches
                    .get_one::<String>("reads")
                    .expect("argument is required"),
                map_matches
                    .get_one::<String>("reference")
                    .expect("argument is required"),
                map_matches
                    .get_one::<String>("output")
                    .expect("argument is required"),
                map_matches.get_flag("force"),
                &alignment_parameters,
            )
            .context("Mapping failed")?;
        }
        _ => bail!("Unknown subcommand"),
    }

    Ok(())
}
