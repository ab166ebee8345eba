/*!
 * Tracing Setup Tests
 */

use forkq::init_tracing;

#[test]
fn test_init_tracing_installs_once() {
    assert!(init_tracing());
    assert!(!init_tracing());
}
