use clap::{crate_version, Arg, Command};

pub fn build_argparse() -> Command<'static> {
    Command::new("wikitopics")
        .about("Assign every page of a wiki to a curated topic through an absorbing random walk")
        .version(crate_version!())
        .subcommand_required(true)
        .subcommand(
            Command::new("assign")
                .about("Build the semantic graph from dump tables and compute the assignment")
                .args(&[
                    Arg::new("dumps")
                        .long("dumps")
                        .required(true)
                        .takes_value(true)
                        .help("Directory holding the CSV dump tables"),
                    Arg::new("topics")
                        .long("topics")
                        .required(true)
                        .takes_value(true)
                        .help("Path to the topic configuration JSON"),
                    Arg::new("tmp")
                        .long("tmp")
                        .takes_value(true)
                        .default_value(".")
                        .help("Scratch directory for the chain solver"),
                    Arg::new("output")
                        .long("output")
                        .required(true)
                        .takes_value(true)
                        .help("Where to write the page-to-topic JSON"),
                ]),
        )
        .subcommand(
            Command::new("sync")
                .about("Synchronize topic configurations across languages via langlinks")
                .args(&[
                    Arg::new("configs")
                        .long("configs")
                        .required(true)
                        .takes_value(true)
                        .multiple_values(true)
                        .help("Topic configuration JSON files to synchronize"),
                    Arg::new("outdir")
                        .long("outdir")
                        .takes_value(true)
                        .default_value(".")
                        .help("Directory for the synchronized configurations"),
                ]),
        )
}
