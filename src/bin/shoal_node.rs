//! Shoal node executable: starts one node, joins the cluster through the
//! introducer, and drives it from an interactive command loop. Local file
//! reads and writes happen here; the core only ever sees raw bytes.

use clap::Parser;

use env_logger::Env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Builder;
use tokio::sync::watch;

use shoal::{pf_error, pf_warn, DetectorMode, ShoalError, ShoalNode};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Host name or address this node binds and advertises.
    #[arg(long, default_value_t = String::from("localhost"))]
    host: String,

    /// UDP port this node binds and advertises.
    #[arg(short, long)]
    port: u16,

    /// Introducer host to contact when joining.
    #[arg(long, default_value_t = String::from("localhost"))]
    introducer_host: String,

    /// Introducer port to contact when joining.
    #[arg(long, default_value_t = 12345)]
    introducer_port: u16,

    /// Directory for persisted metadata and blocks.
    #[arg(long)]
    storage_root: Option<String>,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Extra node configuration as a TOML string.
    #[arg(short, long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitizes command line arguments, returning the composed node
    /// configuration string on success.
    fn sanitize(&self) -> Result<Option<String>, ShoalError> {
        if self.port <= 1024 {
            return Err(ShoalError(format!("invalid port {}", self.port)));
        }
        if self.introducer_port <= 1024 {
            return Err(ShoalError(format!(
                "invalid introducer_port {}",
                self.introducer_port
            )));
        }
        if self.threads < 2 {
            return Err(ShoalError(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }

        let mut config = String::new();
        if let Some(root) = &self.storage_root {
            config.push_str(&format!("storage_root = '{}'\n", root));
        }
        if let Some(extra) = &self.config {
            config.push_str(extra);
        }
        Ok(if config.is_empty() {
            None
        } else {
            Some(config)
        })
    }
}

const HELP_TEXT: &str = "\
file operations:
  create <localfile> <dfsfile>      upload a local file
  get <dfsfile> <localfile>         fetch a file to disk
  append <localfile> <dfsfile>      append local bytes to a file
  merge <dfsfile>                   reconcile the file's replicas
  ls <dfsfile>                      show the file's replica set
  store                             list files stored on this node
  getfromreplica <host:port> <dfsfile> <localfile>
                                    fetch from one specific replica
membership operations:
  join                              join the cluster via the introducer
  leave                             leave the cluster and exit
  list_mem                          list all members
  list_mem_ids                      list members with ring positions
  list_self                         show this node's record
  display_suspects                  show suspected members
  display_protocol                  show the failure detection mode
  switch <gossip|ping> <suspect|nosuspect>
                                    change the cluster's detection mode";

/// Runs the interactive command loop until `leave` or end of input.
async fn command_loop(node: &ShoalNode) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["help"] => println!("{}", HELP_TEXT),

            ["create", local, remote] => match tokio::fs::read(local).await {
                Ok(data) => match node.fileops().create_file(remote, data).await {
                    Ok(()) => println!("created '{}'", remote),
                    Err(e) => println!("create failed: {}", e),
                },
                Err(e) => println!("cannot read local file '{}': {}", local, e),
            },

            ["get", remote, local] => match node.fileops().get_file(remote).await {
                Ok(data) => match tokio::fs::write(local, &data).await {
                    Ok(()) => println!("fetched '{}' -> '{}' ({} bytes)", remote, local, data.len()),
                    Err(e) => println!("cannot write local file '{}': {}", local, e),
                },
                Err(e) => println!("get failed: {}", e),
            },

            ["append", local, remote] => match tokio::fs::read(local).await {
                Ok(data) => match node.fileops().append_file(remote, data).await {
                    Ok(()) => println!("append sent for '{}'", remote),
                    Err(e) => println!("append failed: {}", e),
                },
                Err(e) => println!("cannot read local file '{}': {}", local, e),
            },

            ["merge", remote] => match node.fileops().merge_file(remote).await {
                Ok(()) => println!("merge requested for '{}'", remote),
                Err(e) => println!("merge failed: {}", e),
            },

            ["ls", remote] => match node.fileops().ls(remote).await {
                Ok(report) => println!("{}", report),
                Err(e) => println!("ls failed: {}", e),
            },

            ["store"] => {
                println!("node {} (ring position {})", node.endpoint(), node.ring_id());
                let entries = node.fileops().liststore().await;
                if entries.is_empty() {
                    println!("  (no files stored)");
                }
                for entry in entries {
                    println!(
                        "  '{}' (id {}, {} bytes){}",
                        entry.filename,
                        entry.file_id,
                        entry.total_size,
                        if entry.merging { " [merging]" } else { "" }
                    );
                }
            }

            ["getfromreplica", endpoint, remote, local] => {
                match node.fileops().get_from_replica(endpoint, remote).await {
                    Ok(data) => match tokio::fs::write(local, &data).await {
                        Ok(()) => {
                            println!("fetched '{}' from {} ({} bytes)", remote, endpoint, data.len())
                        }
                        Err(e) => println!("cannot write local file '{}': {}", local, e),
                    },
                    Err(e) => println!("get failed: {}", e),
                }
            }

            ["join"] => {
                if node.is_introducer() {
                    println!("this node is the introducer and cannot join itself");
                } else if let Err(e) = node.join_network().await {
                    println!("join failed: {}", e);
                }
            }

            ["leave"] => {
                node.leave_network().await;
                break;
            }

            ["list_mem"] => {
                for info in node.members_snapshot() {
                    println!("{}", info);
                }
            }

            ["list_mem_ids"] => {
                for (position, info) in node.members_with_ring_ids() {
                    println!("{:>20}  {}", position, info);
                }
                println!("self ring position: {}", node.ring_id());
            }

            ["list_self"] => match node.self_record() {
                Some(info) => println!("{}", info),
                None => println!("no self record (left?)"),
            },

            ["display_suspects"] => {
                let suspects = node.suspects();
                if suspects.is_empty() {
                    println!("no suspected members");
                }
                for info in suspects {
                    println!("{}", info);
                }
            }

            ["display_protocol"] => println!("{}", node.current_mode()),

            ["switch", protocol, suspicion] => {
                match DetectorMode::parse_name(protocol, suspicion) {
                    Some(mode) => {
                        if let Err(e) = node.switch_mode(mode).await {
                            println!("switch failed: {}", e);
                        }
                    }
                    None => println!("usage: switch <gossip|ping> <suspect|nosuspect>"),
                }
            }

            _ => println!("invalid command (try 'help')"),
        }
    }
}

// Node executable main entrance.
fn node_main() -> Result<(), ShoalError> {
    let args = CliArgs::parse();
    let config = args.sanitize()?;
    let port = args.port.to_string();
    let introducer_port = args.introducer_port.to_string();

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name(format!("tokio-worker-{}", args.port))
        .build()?;

    runtime.block_on(async move {
        let node = ShoalNode::new_and_setup(
            &args.host,
            &port,
            &args.introducer_host,
            &introducer_port,
            config.as_deref(),
        )
        .await?;

        let (tx_term, rx_term) = watch::channel(false);
        let loop_handle = tokio::spawn(node.clone().run(rx_term));

        // the introducer bootstraps the cluster; everyone else joins it
        if !node.is_introducer() {
            node.join_network().await?;
        }

        command_loop(&node).await;

        if !node.has_left() {
            pf_warn!(node.endpoint(); "input ended without leave, leaving now");
            node.leave_network().await;
        }
        let _ = tx_term.send(true);
        let _ = loop_handle.await;
        Ok(())
    })
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_module_path(true)
        .format_target(false)
        .init();

    if let Err(e) = node_main() {
        pf_error!("node"; "node_main exited: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod node_args_tests {
    use super::*;

    fn args(port: u16, introducer_port: u16, threads: usize) -> CliArgs {
        CliArgs {
            host: "localhost".into(),
            port,
            introducer_host: "localhost".into(),
            introducer_port,
            storage_root: None,
            threads,
            config: None,
        }
    }

    #[test]
    fn sanitize_valid() {
        assert_eq!(args(12346, 12345, 2).sanitize(), Ok(None));
    }

    #[test]
    fn sanitize_invalid_port() {
        assert!(args(1023, 12345, 2).sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_introducer_port() {
        assert!(args(12346, 80, 2).sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        assert!(args(12346, 12345, 1).sanitize().is_err());
    }

    #[test]
    fn sanitize_composes_config() {
        let mut a = args(12346, 12345, 2);
        a.storage_root = Some("/var/lib/shoal".into());
        a.config = Some("fanout = 4".into());
        let composed = a.sanitize().unwrap().unwrap();
        assert!(composed.contains("storage_root = '/var/lib/shoal'"));
        assert!(composed.contains("fanout = 4"));
    }
}
