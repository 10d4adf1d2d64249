use metastore::{env::StdEnv, BufMgr, CacheId, MetaStore, MetadataStorage, Options};
use std::{error::Error, process};
use tracing::info;

const USAGE: &str = "usage: metastore <dir> <cache_id> (alloc <name> | drop <name> | list)";

type BoxError = Box<dyn Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    // enable logging
    tracing_subscriber::fmt::try_init()?;

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let (dir, cache_id, command) = match args.as_slice() {
        [dir, cache_id, command @ ..] if !command.is_empty() => {
            (dir, cache_id.parse::<CacheId>()?, command)
        }
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    let mgr = BufMgr::open(StdEnv, dir, Options::default())?;
    let store = MetadataStorage::new(&mgr, cache_id)?;

    match command {
        [cmd, name] if cmd == "alloc" => {
            let root = store.get_or_allocate_for_tree(name)?;
            let state = if root.allocated { "allocated" } else { "existing" };
            println!("{name}\t{:#018x}\t{state}", root.page_id.page_id);
        }
        [cmd, name] if cmd == "drop" => match store.drop_root_page(name)? {
            Some(root) => println!("{name}\t{:#018x}\tdropped", root.page_id.page_id),
            None => println!("{name}\tnot found"),
        },
        [cmd] if cmd == "list" => {
            for item in store.entries()? {
                println!(
                    "{}\t{:#018x}",
                    String::from_utf8_lossy(&item.name),
                    item.page_id
                );
            }
            info!(level = store.root_level(), "listed indexes");
        }
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    }

    mgr.flush()?;
    Ok(())
}
