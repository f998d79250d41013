use anyhow::Result;

use blockdex::btree::Blockdex;

fn main() -> Result<()> {
    let key = 42;
    let value = 3;

    // Create an empty index
    let mut tree = Blockdex::try_new("hello.idx")?;

    // Make sure we can't find 42 in our tree
    assert!(!tree.contains(key)?);
    assert_eq!(tree.get(key)?, None);

    // Insert 42 with a value of 3
    tree.insert(key, value)?;

    // Make sure we can find 42 in our tree
    assert!(tree.contains(key)?);
    assert_eq!(tree.search(key)?, Some((key, value)));

    // Everything is on disk once we close, so it's still there when we re-open
    tree.close()?;
    let mut tree = Blockdex::try_open("hello.idx")?;
    assert_eq!(tree.get(key)?, Some(value));
    tree.export(std::io::stdout().lock())?;
    tree.close()?;

    std::fs::remove_file("hello.idx")?;
    Ok(())
}
