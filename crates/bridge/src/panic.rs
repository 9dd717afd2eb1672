use std::any::Any;

/// Renders a caught panic payload as a message.
///
/// `panic!` produces either a `&'static str` or a `String`; anything else is
/// reported as opaque.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"opaque panic payload".to_string()
	}
}
