//! Walk through create → read → update → upload → remove against a todo server
//!
//! Run with a server URL: `cargo run --example todo_flow -- http://localhost:8080/todo-server/`

use resource_pipe::{FilePart, Pipeline, Record, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/todo-server/".to_string());

    println!("🧪 Pipe SDK todo flow against {}\n", base_url);

    let pipeline = Pipeline::new(&base_url)?;
    let projects = pipeline.pipe_with(
        pipeline
            .config("projects")
            .with_timeout(Duration::from_secs(20)),
    )?;

    // Create
    println!("📝 Creating project...");
    let created = match projects.save(Record::new().with("title", "Hello World")).await {
        Ok(created) => {
            println!("✅ Created: {}", created);
            created
        }
        Err(e) => {
            println!("❌ Save failed: {}", e);
            println!("\n🔍 Is the server running at {}?", base_url);
            return Ok(());
        }
    };

    // Read back
    let mut record = Record::from_json(created)?;
    let id = record.id_value("id").unwrap_or_default();
    match projects.read(&id).await {
        Ok(project) => println!("✅ Read back: {}", project),
        Err(e) => println!("⚠️ Could not read back: {}", e),
    }

    // Update: the id makes save issue a PUT
    record.insert("title", "Hello Update World!");
    match projects.save(record.clone()).await {
        Ok(updated) => println!("✅ Updated: {}", updated),
        Err(e) => println!("⚠️ Update failed: {}", e),
    }

    // Upload
    println!("\n📤 Uploading attachment...");
    let uploads = pipeline.pipe("upload")?;
    uploads.set_upload_progress(|_, written, total| {
        println!("   sent {} of {} bytes", written, total);
    });
    let attachment = Record::new()
        .with("somekey", "somevalue")
        .with(
            "file",
            FilePart::data(&b"Lorem ipsum dolor sit amet.."[..], "file", "data1.txt", "text/plain"),
        );
    match uploads.save(attachment).await {
        Ok(_) => println!("✅ Upload done"),
        Err(e) => println!("⚠️ Upload failed: {}", e),
    }

    // Cancel
    let pending = projects.read_all();
    projects.cancel();
    match pending.await {
        Err(e) if e.is_cancelled() => println!("\n🛑 read_all cancelled as requested"),
        other => println!("\n🛑 read_all finished before cancel: {:?}", other.map(|_| ())),
    }

    // Remove
    println!("\n🗑️ Cleaning up...");
    match projects.remove(record).await {
        Ok(_) => println!("✅ Project removed"),
        Err(e) => println!("⚠️ Could not remove: {}", e),
    }

    println!("\n✨ Done!");
    Ok(())
}
