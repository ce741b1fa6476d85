use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process;

use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use wikitopics::dump::DumpFiles;
use wikitopics::nationalization::{self, Nationalization};
use wikitopics::{assign, Assignment};

mod arg;

/// The main function parses command line arguments and wires a ctrl-c
/// handler to the cancellation token; the pipeline itself runs on a blocking
/// worker.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = arg::build_argparse().get_matches();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                event!(Level::WARN, "interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    match args.subcommand() {
        Some(("assign", sub)) => run_assign(sub, cancel).await,
        Some(("sync", sub)) => run_sync(sub, cancel).await,
        _ => unreachable!("a subcommand is required"),
    }
}

async fn run_assign(args: &clap::ArgMatches, cancel: CancellationToken) {
    let topics = Nationalization::load(Path::new(args.value_of("topics").unwrap()))
        .expect("cannot read the topic configuration file");
    let dumps = DumpFiles::new(args.value_of("dumps").unwrap());
    let tmp = args.value_of("tmp").unwrap().to_string();
    let output = args.value_of("output").unwrap().to_string();

    let topic2seeds = topics.topic_assignments();
    let filters = topics.default_filters();

    let worker = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            assign(&cancel, Path::new(&tmp), &dumps, &topic2seeds, &filters)
        })
    };
    match worker.await {
        Ok(Ok(assignment)) => {
            write_assignment(&output, &assignment);
            event!(
                Level::INFO,
                pages = assignment.page2topic.len(),
                output = output.as_str(),
                "assignment written"
            );
        }
        Ok(Err(e)) if e.is_cancelled() => {
            event!(Level::WARN, "assignment cancelled");
            process::exit(130);
        }
        Ok(Err(e)) => {
            event!(Level::ERROR, error = %e, "assignment failed");
            process::exit(1);
        }
        Err(e) => {
            event!(Level::ERROR, error = %e, "assignment worker died");
            process::exit(1);
        }
    }
}

fn write_assignment(path: &str, assignment: &Assignment) {
    // JSON object keys are strings, so the page IDs become strings here
    let page2topic: HashMap<String, u32> = assignment
        .page2topic
        .iter()
        .map(|(&page, &topic)| (page.to_string(), topic))
        .collect();
    let document = serde_json::json!({
        "page2topic": page2topic,
        "topics": assignment.namespaces.topics,
        "categories": assignment.namespaces.categories,
        "articles": assignment.namespaces.articles,
    });
    let raw = serde_json::to_string_pretty(&document).expect("cannot serialize the assignment");
    fs::write(path, raw).expect("cannot write the assignment file");
}

async fn run_sync(args: &clap::ArgMatches, cancel: CancellationToken) {
    let configs: Vec<Nationalization> = args
        .values_of("configs")
        .unwrap()
        .map(|path| {
            Nationalization::load(Path::new(path)).expect("cannot read a topic configuration file")
        })
        .collect();
    let outdir = Path::new(args.value_of("outdir").unwrap());

    match nationalization::sync(&configs, &cancel).await {
        Ok(synced) => {
            for (lang, config) in &synced {
                let path = outdir.join(format!("{}.json", lang));
                config
                    .save(&path)
                    .expect("cannot write a synchronized configuration");
            }
            event!(Level::INFO, languages = synced.len(), "configurations synchronized");
        }
        Err(e) => {
            event!(Level::ERROR, error = %e, "synchronization failed");
            process::exit(1);
        }
    }
}
