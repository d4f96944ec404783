/*
 * Console endpoint
 *
 * Reads block on the keyboard event stream and complete after the first
 * usable key; writes pass straight through to the terminal sink. Both
 * sides live behind `platform` hooks; the drivers are not part of this
 * core.
 */

use super::Errno;
use crate::platform::{self, KeyEvent};

/// Block for one key event and translate it to a byte.
pub(crate) fn read(buf: &mut [u8]) -> Result<usize, Errno> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        let event = platform::keyboard_next().ok_or(Errno::EIO)?;
        let byte = match event {
            KeyEvent::Char(c) => c,
            KeyEvent::Enter => b'\n',
            KeyEvent::Backspace => 0x08,
            KeyEvent::Other => continue,
        };
        buf[0] = byte;
        return Ok(1);
    }
}

pub(crate) fn write(buf: &[u8]) -> Result<usize, Errno> {
    platform::console_write(buf);
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::KeyboardSource;
    use crate::testing;
    use std::sync::Mutex as StdMutex;

    struct Script(StdMutex<Vec<KeyEvent>>);

    impl KeyboardSource for Script {
        fn next_event(&self) -> KeyEvent {
            self.0.lock().unwrap().remove(0)
        }
    }

    #[test]
    fn read_returns_after_first_usable_event() {
        let _g = testing::fixture();
        let script: &'static Script = Box::leak(Box::new(Script(StdMutex::new(vec![
            KeyEvent::Other,
            KeyEvent::Char(b'x'),
        ]))));
        platform::set_keyboard(script);

        let mut buf = [0u8; 4];
        assert_eq!(read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn enter_and_backspace_map_to_control_bytes() {
        let _g = testing::fixture();
        let script: &'static Script = Box::leak(Box::new(Script(StdMutex::new(vec![
            KeyEvent::Enter,
            KeyEvent::Backspace,
        ]))));
        platform::set_keyboard(script);

        let mut buf = [0u8; 1];
        assert_eq!(read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'\n');
        assert_eq!(read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x08);
    }
}
