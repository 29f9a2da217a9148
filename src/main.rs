use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};

use pdfrewrite::base::Error;
use pdfrewrite::lin::check_linearization;
use pdfrewrite::reader::load_document;
use pdfrewrite::write::{ObjStreamMode, StreamDataMode, Writer, WriterConfig};

fn usage() {
    println!("Usage: {} infile [outfile] [options]",
        std::env::args().next().unwrap_or("pdfrewrite".into()));
    println!("  --linearize                  optimize the output for fast web view");
    println!("  --qdf                        produce an annotated, editable layout");
    println!("  --object-streams MODE        generate | preserve | disable");
    println!("  --stream-data MODE           compress | preserve | uncompress");
    println!("  --static-id                  fixed /ID (for reproducible test output)");
    println!("  --deterministic-id           /ID derived from the output contents");
    println!("  --preserve-unreferenced      keep objects unreachable from the trailer");
    println!("  --newline-before-endstream   always end stream data with a newline");
    println!("  --check-linearization        validate the input's linearization metadata");
    println!("  --show-npages                print the number of pages");
}

fn main() -> Result<(), Error> {
    stderrlog::new()
        .verbosity(log::Level::Trace)
        .init()
        .unwrap();

    let mut input = None;
    let mut output = None;
    let mut builder = WriterConfig::builder();
    let mut check = false;
    let mut show_npages = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--linearize" => builder = builder.linearize(true)?,
            "--qdf" => builder = builder.qdf(true)?,
            "--static-id" => builder = builder.static_id(true)?,
            "--deterministic-id" => builder = builder.deterministic_id(true)?,
            "--preserve-unreferenced" => builder = builder.preserve_unreferenced(true),
            "--newline-before-endstream" => builder = builder.newline_before_endstream(true),
            "--check-linearization" => check = true,
            "--show-npages" => show_npages = true,
            "--object-streams" => {
                let mode = match args.next().as_deref() {
                    Some("generate") => ObjStreamMode::Generate,
                    Some("preserve") => ObjStreamMode::Preserve,
                    Some("disable") => ObjStreamMode::Disable,
                    _ => return Ok(usage())
                };
                builder = builder.object_streams(mode);
            },
            "--stream-data" => {
                let mode = match args.next().as_deref() {
                    Some("compress") => StreamDataMode::Compress,
                    Some("preserve") => StreamDataMode::Preserve,
                    Some("uncompress") => StreamDataMode::Uncompress,
                    _ => return Ok(usage())
                };
                builder = builder.stream_data(mode);
            },
            _ if arg.starts_with("--") => return Ok(usage()),
            _ if input.is_none() => input = Some(arg),
            _ if output.is_none() => output = Some(arg),
            _ => return Ok(usage())
        }
    }
    let Some(input) = input else {
        return Ok(usage());
    };

    let mut data = Vec::new();
    File::open(&input)?.read_to_end(&mut data)?;
    let (document, xref) = load_document(Cursor::new(&data[..]))?;

    if show_npages {
        println!("{}", document.pages()?.len());
    }

    if check {
        let warnings = check_linearization(&document, &xref, &data)?;
        if warnings.is_empty() {
            println!("{input}: no linearization errors found");
        } else {
            for warning in &warnings {
                println!("{input}: {warning}");
            }
        }
    }

    if let Some(output) = output {
        let mut writer = Writer::new(&document, builder.build()?);
        writer.set_input_xref(&xref);
        writer.set_output_name(&output);
        let mut out = BufWriter::new(File::create(&output)?);
        writer.write(&mut out)?;
        out.flush()?;
        if !writer.warnings().is_empty() {
            log::warn!("{output}: {} warning(s) while writing", writer.warnings().len());
        }
    }

    Ok(())
}
