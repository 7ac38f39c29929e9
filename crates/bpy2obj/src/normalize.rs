//! Script text normalization for scripts pasted from chat-style generators
//!
//! Contract, applied in order:
//! 1. If the text contains a fenced code block (a line starting with three
//!    backticks, optionally followed by a language tag), only the body of the
//!    first such block is kept. An unclosed fence runs to the end of the text.
//!    A block with a blank body, or a lone fence that follows code, is not a
//!    block: the fence lines are dropped and everything else is kept.
//! 2. Trailing prose is cut at the first unindented line, after some code,
//!    that starts with one of [`PROSE_MARKERS`].
//! 3. Trailing `--` and stray backticks are removed and the result trimmed.
//!
//! Indented lines and comments never trigger a cut, so code such as
//! `    # The model is centred` survives. Normalizing twice is a no-op.

/// Phrases that start explanatory prose after a generated script
pub const PROSE_MARKERS: &[&str] = &[
    "This script creates",
    "Note:",
    "The script",
    "This model",
    "The model",
    "This will",
    "This code",
    "The code",
];

const FENCE: &str = "```";

pub fn normalize_script(text: &str) -> String {
    let body = fenced_body(text).unwrap_or_else(|| drop_fences(text));
    let body = cut_trailing_prose(&body);
    strip_trailing_noise(&body)
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

fn is_blank(line: &&str) -> bool {
    line.trim().is_empty()
}

fn fenced_body(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let fences: Vec<usize> = (0..lines.len()).filter(|&i| is_fence(lines[i])).collect();
    let &open = fences.first()?;

    // A single fence after code closes a block whose opening line was lost
    if fences.len() == 1 && !lines[..open].iter().all(is_blank) {
        return None;
    }

    let close = fences.get(1).copied().unwrap_or(lines.len());
    let body = &lines[open + 1..close];
    if body.iter().all(is_blank) {
        return None;
    }
    Some(body.join("\n"))
}

fn drop_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !is_fence(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn cut_trailing_prose(text: &str) -> String {
    let mut kept = Vec::new();
    let mut seen_code = false;

    for line in text.lines() {
        let unindented = !line.starts_with(char::is_whitespace);
        if seen_code && unindented && PROSE_MARKERS.iter().any(|m| line.starts_with(m)) {
            break;
        }
        if !line.trim().is_empty() {
            seen_code = true;
        }
        kept.push(line);
    }

    kept.join("\n")
}

fn strip_trailing_noise(text: &str) -> String {
    let mut s = text.trim();
    loop {
        let next = s
            .strip_suffix("--")
            .or_else(|| s.strip_suffix('`'))
            .map(str::trim_end);
        match next {
            Some(shorter) => s = shorter,
            None => break,
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_script_unchanged() {
        let script = "import bpy\n\nbpy.ops.mesh.primitive_cube_add(size=2)";
        assert_eq!(normalize_script(script), script);
    }

    #[test]
    fn test_fenced_block_extracted() {
        let text = "Here you go:\n```python\nimport bpy\nbpy.ops.mesh.primitive_cube_add()\n```\nThis script creates a cube.";
        assert_eq!(
            normalize_script(text),
            "import bpy\nbpy.ops.mesh.primitive_cube_add()"
        );
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let text = "```\nscene.cube()\nscene.plane()\n";
        assert_eq!(normalize_script(text), "scene.cube()\nscene.plane()");
    }

    #[test]
    fn test_only_first_block_kept() {
        let text = "```lua\nscene.cube()\n```\nand also\n```lua\nscene.plane()\n```";
        assert_eq!(normalize_script(text), "scene.cube()");
    }

    #[test]
    fn test_stray_closing_fence_keeps_code() {
        let text = "import bpy\nbpy.ops.mesh.primitive_cube_add()\n```";
        assert_eq!(
            normalize_script(text),
            "import bpy\nbpy.ops.mesh.primitive_cube_add()"
        );
    }

    #[test]
    fn test_stray_closing_fence_before_prose() {
        let text = "scene.cube()\n```\nThis script creates a cube.";
        assert_eq!(normalize_script(text), "scene.cube()");
    }

    #[test]
    fn test_empty_block_falls_back_to_rest() {
        let text = "```\n```\nscene.plane()";
        assert_eq!(normalize_script(text), "scene.plane()");
    }

    #[test]
    fn test_trailing_prose_cut() {
        let text = "import bpy\nbpy.ops.mesh.primitive_cube_add()\n\nNote: run this in Blender 3.x\nThe model is red.";
        assert_eq!(
            normalize_script(text),
            "import bpy\nbpy.ops.mesh.primitive_cube_add()"
        );
    }

    #[test]
    fn test_indented_and_commented_markers_kept() {
        let text = "def build():\n    # The model is centred\n    The_code = 1\n# Note: keep this\nbuild()";
        assert_eq!(normalize_script(text), text);
    }

    #[test]
    fn test_leading_marker_not_cut() {
        let text = "The script below:\nscene.cube()";
        assert_eq!(normalize_script(text), text);
    }

    #[test]
    fn test_trailing_dashes_and_backticks() {
        assert_eq!(normalize_script("scene.cube()\n--\n`"), "scene.cube()");
        assert_eq!(normalize_script("scene.cube()``"), "scene.cube()");
    }

    #[test]
    fn test_idempotent() {
        let text = "```python\nimport bpy\n```\nThe code above adds a cube.\n--";
        let once = normalize_script(text);
        assert_eq!(normalize_script(&once), once);
    }
}
