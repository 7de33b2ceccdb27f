//! `ragdesk chat`: interactive or single-message chat in the terminal.

use std::io::Write;

use ragdesk_config::AppConfig;
use ragdesk_core::message::SessionId;
use ragdesk_gateway::Services;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    config: AppConfig,
    message: Option<String>,
    in_memory: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    super::require_api_key(&config)?;

    let services = Services::build(&config, super::backend(in_memory)).await?;
    let session = services.session_factory(&config).create(SessionId::new());

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let answer = session.chat(&msg).await;
        eprint!("\r              \r");
        println!("{answer}");
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ragdesk chat");
    println!();
    println!("  Provider:  {}", config.completion.provider);
    println!("  Model:     {}", config.completion.model);
    println!("  Knowledge: {}", services.knowledge.name());
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '/reset' to start over, 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                let cleared = session.reset().await;
                println!("  {}", if cleared { "History cleared." } else { "Reset failed." });
                continue;
            }
            _ => {}
        }

        print!("  Bot > ");
        match session.start_stream(line).await {
            Some(mut chunks) => {
                while let Some(chunk) = chunks.recv().await {
                    print!("{chunk}");
                    std::io::stdout().flush()?;
                }
            }
            // Streaming failed to start, answer through the fallback path
            None => print!("{}", session.chat(line).await),
        }
        println!();
        println!();
    }

    Ok(())
}
