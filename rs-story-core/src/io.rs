use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Reads a text corpus as a list of documents.
///
/// - A file yields a single document
/// - A directory yields one document per `.txt` file, in file name order
pub fn read_documents<P: AsRef<Path>>(path: P) -> io::Result<Vec<String>> {
	let path = path.as_ref();
	if path.is_dir() {
		let mut files = list_files(path, "txt")?;
		files.sort();
		files
			.iter()
			.map(|name| fs::read_to_string(path.join(name)))
			.collect()
	} else {
		Ok(vec![fs::read_to_string(path)?])
	}
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `data/stories.txt` + `"bin"` → `data/stories.bin`
/// `data/stories/` + `"bin"` → `data/stories.bin`
pub fn build_output_path<P: AsRef<Path>>(input_path: P, output_extension: &str) -> io::Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}

/// Lists all files with a given extension in a directory.
///
/// Returns file names only (no paths).
fn list_files<P: AsRef<Path>>(dir: P, extension: &str) -> io::Result<Vec<String>> {
	let mut files = Vec::new();

	for entry in fs::read_dir(dir)? {
		let path = entry?.path();

		if path.is_file() && path.extension() == Some(std::ffi::OsStr::new(extension)) {
			if let Some(name) = path.file_name() {
				files.push(name.to_string_lossy().to_string());
			}
		}
	}

	Ok(files)
}
