//! Check command implementation.
//!
//! Validates configuration and Docker daemon connectivity.

use anyhow::Result;
use dockpanel::config::validate_effective_config;
use dockpanel::runtime::DockerRuntime;
use dockpanel::{Config, ContainerRuntime};

/// Validates configuration and checks that the Docker daemon is reachable.
pub async fn command_check(containers: bool, config: &Config) -> Result<()> {
    println!("dockpanel - System Check");
    println!("========================");

    let mut all_ok = true;

    println!("\nChecking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   OK   configuration is valid"),
        Err(e) => {
            println!("   FAIL configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\nChecking Docker daemon...");
    let runtime = match DockerRuntime::connect(config.docker_socket.as_deref()) {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            println!("   FAIL cannot connect: {}", e);
            all_ok = false;
            None
        }
    };

    if let Some(runtime) = &runtime {
        match runtime.ping().await {
            Ok(reply) => println!("   OK   daemon answered ping ({})", reply.trim()),
            Err(e) => {
                println!("   FAIL ping failed: {}", e);
                all_ok = false;
            }
        }

        if containers {
            println!("\nListing running containers...");
            match runtime.list_running().await {
                Ok(list) => {
                    println!("   OK   {} running containers", list.len());
                    for c in &list {
                        println!("   - {:25} {:40} {}", c.display_name(), c.image, short(&c.id));
                    }
                }
                Err(e) => {
                    println!("   FAIL listing failed: {}", e);
                    all_ok = false;
                }
            }
        }
    }

    println!("\nSummary:");
    if all_ok {
        println!("   All checks passed");
        Ok(())
    } else {
        println!("   Some checks failed");
        std::process::exit(1);
    }
}

fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
