/*
 * raftkv is a replicated key/value store replica. It takes a broker UDP
 * port, its own ID, and its peers' IDs, then joins the cluster and serves
 * client puts and gets through the broker.
 */

#![warn(clippy::all)]

use raftkv::error::Result;
use raftkv::Server;

use std::collections::HashSet;

fn main() -> Result<()> {
    let args = clap::command!()
        .about("A replicated key/value store replica")
        .arg(
            clap::Arg::new("port")
                .required(true)
                .value_parser(clap::value_parser!(u16))
                .help("UDP port of the message broker"),
        )
        .arg(clap::Arg::new("id").required(true).help("ID of this replica"))
        .arg(
            clap::Arg::new("peers")
                .required(true)
                .num_args(1..)
                .help("IDs of the other replicas"),
        )
        .arg(
            clap::Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("Log level"),
        )
        .get_matches();

    let loglevel =
        args.get_one::<String>("log-level").unwrap().parse::<simplelog::LevelFilter>()?;
    let mut logconfig = simplelog::ConfigBuilder::new();
    if loglevel != simplelog::LevelFilter::Debug {
        logconfig.add_filter_allow_str("raftkv");
    }
    simplelog::SimpleLogger::init(loglevel, logconfig.build())?;

    let port = *args.get_one::<u16>("port").unwrap();
    let id = args.get_one::<String>("id").unwrap().clone();
    let peers: HashSet<String> = args.get_many::<String>("peers").unwrap().cloned().collect();

    Server::new(id, peers, port)?.serve()
}
