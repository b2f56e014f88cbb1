use anyhow::Context;
use rseq_check::analyze_rseq_critical_sections_in_file;
use std::path::Path;
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        eprintln!("error: expected at least one file");
        eprintln!("usage: rseq-check ELFFILE...");
        return Ok(ExitCode::FAILURE);
    }

    let mut ok = true;
    for file_path in &files {
        let analysis = analyze_rseq_critical_sections_in_file(Path::new(file_path))
            .with_context(|| format!("failed to analyze {file_path}"))?;
        for problem in analysis.problems() {
            match problem.critical_section() {
                Some(critical_section) => {
                    eprintln!(
                        "{file_path}: in critical section in function {}:",
                        critical_section.function
                    );
                    eprintln!(
                        "  note: function starts at address:         {:#x}",
                        critical_section.function_address
                    );
                    eprintln!(
                        "  note: critical section starts at address: {:#x}",
                        critical_section.start_address
                    );
                    eprint!(
                        "  note: critical section ends at address:   {:#x}",
                        critical_section.post_commit_address
                    );
                    if let Some(size) = critical_section.size_in_bytes() {
                        eprint!(" (+{size} bytes)");
                    }
                    eprintln!();
                    eprintln!(
                        "  note: abort handler starts at address:    {:#x}",
                        critical_section.abort_address
                    );
                    eprintln!("  error: {problem}");
                }
                None => {
                    eprintln!("{file_path}: error: {problem}");
                }
            }
            ok = false;
        }
    }
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
