//! Built-in page served when the host binary is not given one.

pub const FALLBACK_URL: &str = "https://sandbox.local/checkout";

/// A small checkout page with the controls the tools like to play with: a
/// popup trigger, a form with a submit button, an in-page anchor and a link
/// that would leave the frame.
pub const FALLBACK_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Checkout</title>
</head>
<body>
  <header id="top">
    <h1>Checkout</h1>
    <nav>
      <a href="#summary">Order summary</a>
      <a href="https://shop.example.com/help">Help centre</a>
    </nav>
  </header>
  <main>
    <section id="summary">
      <h2>Your order</h2>
      <ul>
        <li>Mechanical keyboard <span class="price">89.00</span></li>
        <li>Desk mat <span class="price">19.00</span></li>
      </ul>
      <button data-testid="promo-popup" aria-haspopup="true">Have a promo code?</button>
    </section>
    <form id="checkout" action="/checkout/confirm">
      <label>Email <input name="email" type="email" value=""></label>
      <label>Card number <input name="card" value=""></label>
      <label>Notes <textarea name="notes"></textarea></label>
      <button id="pay" type="submit">Pay now</button>
      <button type="button" class="secondary">Save for later</button>
    </form>
  </main>
  <footer>
    <a href="https://shop.example.com/terms" target="_blank">Terms</a>
  </footer>
</body>
</html>
"##;

/// The page body to load: `custom` when given, else the fallback.
pub fn page_source(custom: Option<String>) -> (String, String) {
    match custom {
        Some(html) => ("https://sandbox.local/".to_string(), html),
        None => (FALLBACK_URL.to_string(), FALLBACK_PAGE.to_string()),
    }
}
