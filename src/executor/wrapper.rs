//! Python source templates wrapped around generated block code.
//!
//! The import allowlist is a compatibility lint on oracle output, not a
//! trust boundary: code running in the same interpreter can trivially
//! bypass it. Real isolation would have to live at the process/OS layer.

/// Prelude prepended to generated code: allowlist import filter.
const PRELUDE: &str = r#"# Generated by infocentral. Do not edit.
import sys
import json
import asyncio

# Import allowlist. This is a lint on generated code, not a sandbox:
# unknown packages still import if installed; only genuinely missing
# ones are reported as allowlist violations.
_ALLOWED_PACKAGES = {
    'requests', 'httpx', 'beautifulsoup4', 'bs4', 'pandas', 'numpy',
    'dateutil', 'jmespath', 'aiohttp',
    'json', 'datetime', 'time', 'urllib', 're', 'math', 'statistics',
    'collections', 'itertools', 'functools', 'typing', 'asyncio',
}

_original_import = __builtins__.__import__

def _restricted_import(name, globals=None, locals=None, fromlist=(), level=0):
    base = name.split('.')[0]
    if base not in _ALLOWED_PACKAGES and not base.startswith('_'):
        try:
            return _original_import(name, globals, locals, fromlist, level)
        except ImportError:
            raise ImportError("package '%s' is not in the allowlist" % name)
    return _original_import(name, globals, locals, fromlist, level)

__builtins__.__import__ = _restricted_import

# Generated block code follows.
"#;

/// Driver appended after generated code: runs the two-stage contract and
/// prints exactly one JSON document to stdout.
const DRIVER: &str = r#"

async def _run_block():
    executor = BlockExecutor()
    raw = await executor.fetch_data()
    processed = await executor.process_data(raw)
    print(json.dumps(processed, default=str))

if __name__ == '__main__':
    try:
        asyncio.run(_run_block())
    except Exception:
        import traceback
        traceback.print_exc(file=sys.stderr)
        sys.exit(1)
"#;

/// Launcher script (`execute.py`) materialized next to the wrapped code.
pub const LAUNCHER: &str = r#"# Generated by infocentral. Do not edit.
import json
import os
import sys

_HERE = os.path.dirname(os.path.abspath(__file__))

try:
    with open(os.path.join(_HERE, 'block_executor.py')) as f:
        _source = f.read()
    exec(compile(_source, 'block_executor.py', 'exec'))
except SystemExit:
    raise
except Exception as e:
    print(json.dumps({'error': True, 'message': str(e), 'type': type(e).__name__}),
          file=sys.stderr)
    sys.exit(1)
"#;

/// Wrap generated backend code with the allowlist prelude and the
/// two-stage execution driver.
pub fn wrap(code: &str) -> String {
    let mut out = String::with_capacity(PRELUDE.len() + code.len() + DRIVER.len() + 1);
    out.push_str(PRELUDE);
    out.push_str(code);
    out.push_str(DRIVER);
    out
}
