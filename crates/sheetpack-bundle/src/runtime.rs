//! Bundle runtime and script bundle rendering.

use std::collections::BTreeMap;

use sheetpack_loaders::HELPERS_GLOBAL;

use crate::linker::{quote, REQUIRE};
use crate::sourcemap::IndexMap;

/// Module registry, loader and ES module interop helpers.
const PRELUDE: &str = r#"(function (modules, entries) {
  var cache = {};
  var hotData = {};

  function __sheetpack_require__(id) {
    var cached = cache[id];
    if (cached !== undefined) {
      return cached.exports;
    }
    var factory = modules[id];
    if (factory === undefined) {
      throw new Error("Cannot find module '" + id + "'");
    }
    var module = (cache[id] = { id: id, loaded: false, exports: {} });
    if (__sheetpack_require__.hot) {
      module.hot = __sheetpack_require__.hot(id, hotData[id]);
    }
    factory.call(module.exports, module, module.exports, __sheetpack_require__);
    module.loaded = true;
    return module.exports;
  }

  var hasOwn = Object.prototype.hasOwnProperty;

  __sheetpack_require__.m = modules;
  __sheetpack_require__.c = cache;

  __sheetpack_require__.r = function (exports) {
    if (typeof Symbol !== "undefined" && Symbol.toStringTag) {
      Object.defineProperty(exports, Symbol.toStringTag, { value: "Module" });
    }
    Object.defineProperty(exports, "__esModule", { value: true });
  };

  __sheetpack_require__.d = function (exports, getters) {
    for (var key in getters) {
      if (hasOwn.call(getters, key) && !hasOwn.call(exports, key)) {
        Object.defineProperty(exports, key, { enumerable: true, get: getters[key] });
      }
    }
  };

  __sheetpack_require__.s = function (exports, source) {
    Object.keys(source).forEach(function (key) {
      if (key !== "default" && !hasOwn.call(exports, key)) {
        Object.defineProperty(exports, key, {
          enumerable: true,
          get: function () { return source[key]; }
        });
      }
    });
  };

  __sheetpack_require__.i = function (m) {
    if (m && m.__esModule) {
      return m;
    }
    var ns = { default: m };
    if (m && (typeof m === "object" || typeof m === "function")) {
      for (var key in m) {
        if (key !== "default") {
          ns[key] = m[key];
        }
      }
    }
    return ns;
  };
"#;

/// Syntax-lowering helpers, installed as a global so that factories built
/// by the hot client with `new Function` reach them too.
const HELPERS: &str = r#"(function (root) {
  if (root.babelHelpers) {
    return;
  }
  var hasOwn = Object.prototype.hasOwnProperty;
  var iteratorSymbol = (typeof Symbol === "function" && Symbol.iterator) || "@@iterator";
  var asyncIteratorSymbol = (typeof Symbol === "function" && Symbol.asyncIterator) || "@@asyncIterator";

  function toPrimitive(input, hint) {
    if (typeof input !== "object" || input === null) {
      return input;
    }
    var convert = typeof Symbol === "function" ? input[Symbol.toPrimitive] : undefined;
    if (convert !== undefined) {
      var result = convert.call(input, hint || "default");
      if (typeof result !== "object") {
        return result;
      }
      throw new TypeError("@@toPrimitive must return a primitive value.");
    }
    return (hint === "string" ? String : Number)(input);
  }

  function toPropertyKey(value) {
    var key = toPrimitive(value, "string");
    return typeof key === "symbol" ? key : String(key);
  }

  function defineProperty(target, key, value) {
    key = toPropertyKey(key);
    if (key in target) {
      Object.defineProperty(target, key, { value: value, enumerable: true, configurable: true, writable: true });
    } else {
      target[key] = value;
    }
    return target;
  }

  function ownKeys(object, enumerableOnly) {
    var keys = Object.keys(object);
    if (Object.getOwnPropertySymbols) {
      var symbols = Object.getOwnPropertySymbols(object);
      if (enumerableOnly) {
        symbols = symbols.filter(function (symbol) {
          return Object.getOwnPropertyDescriptor(object, symbol).enumerable;
        });
      }
      keys.push.apply(keys, symbols);
    }
    return keys;
  }

  function objectSpread2(target) {
    for (var i = 1; i < arguments.length; i++) {
      var source = arguments[i] != null ? arguments[i] : {};
      if (i % 2) {
        ownKeys(Object(source), true).forEach(function (key) {
          defineProperty(target, key, source[key]);
        });
      } else if (Object.getOwnPropertyDescriptors) {
        Object.defineProperties(target, Object.getOwnPropertyDescriptors(source));
      } else {
        ownKeys(Object(source)).forEach(function (key) {
          Object.defineProperty(target, key, Object.getOwnPropertyDescriptor(source, key));
        });
      }
    }
    return target;
  }

  function objectWithoutProperties(source, excluded) {
    if (source == null) {
      return {};
    }
    var target = {};
    var key;
    for (key in source) {
      if (hasOwn.call(source, key) && excluded.indexOf(key) < 0) {
        target[key] = source[key];
      }
    }
    if (Object.getOwnPropertySymbols) {
      var symbols = Object.getOwnPropertySymbols(source);
      for (var i = 0; i < symbols.length; i++) {
        key = symbols[i];
        if (excluded.indexOf(key) < 0 && Object.prototype.propertyIsEnumerable.call(source, key)) {
          target[key] = source[key];
        }
      }
    }
    return target;
  }

  function objectDestructuringEmpty(value) {
    if (value == null) {
      throw new TypeError("Cannot destructure " + value);
    }
  }

  function asyncStep(gen, resolve, reject, next, thrown, key, arg) {
    var info;
    try {
      info = gen[key](arg);
    } catch (error) {
      reject(error);
      return;
    }
    if (info.done) {
      resolve(info.value);
    } else {
      Promise.resolve(info.value).then(next, thrown);
    }
  }

  function asyncToGenerator(fn) {
    return function () {
      var self = this;
      var args = arguments;
      return new Promise(function (resolve, reject) {
        var gen = fn.apply(self, args);
        function next(value) { asyncStep(gen, resolve, reject, next, thrown, "next", value); }
        function thrown(error) { asyncStep(gen, resolve, reject, next, thrown, "throw", error); }
        next(undefined);
      });
    };
  }

  // `kind` 0 marks an awaited value, 1 a value delegated through `yield*`.
  function OverloadYield(value, kind) {
    this.v = value;
    this.k = kind;
  }

  function awaitAsyncGenerator(value) {
    return new OverloadYield(value, 0);
  }

  function AsyncGenerator(gen) {
    var front = null;
    var back = null;

    function resume(key, arg) {
      try {
        var result = gen[key](arg);
        var value = result.value;
        var overloaded = value instanceof OverloadYield;
        Promise.resolve(overloaded ? value.v : value).then(function (arg) {
          if (overloaded) {
            var nextKey = key === "return" ? "return" : "next";
            if (!value.k || arg.done) {
              resume(nextKey, arg);
              return;
            }
            arg = gen[nextKey](arg).value;
          }
          settle(result.done ? "return" : "normal", arg);
        }, function (error) {
          resume("throw", error);
        });
      } catch (error) {
        settle("throw", error);
      }
    }

    function settle(type, value) {
      if (type === "return") {
        front.resolve({ value: value, done: true });
      } else if (type === "throw") {
        front.reject(value);
      } else {
        front.resolve({ value: value, done: false });
      }
      front = front.next;
      if (front) {
        resume(front.key, front.arg);
      } else {
        back = null;
      }
    }

    this._invoke = function (key, arg) {
      return new Promise(function (resolve, reject) {
        var request = { key: key, arg: arg, resolve: resolve, reject: reject, next: null };
        if (back) {
          back = back.next = request;
        } else {
          front = back = request;
          resume(key, arg);
        }
      });
    };
    if (typeof gen.return !== "function") {
      this.return = undefined;
    }
  }

  AsyncGenerator.prototype[asyncIteratorSymbol] = function () { return this; };
  AsyncGenerator.prototype.next = function (arg) { return this._invoke("next", arg); };
  AsyncGenerator.prototype.throw = function (arg) { return this._invoke("throw", arg); };
  AsyncGenerator.prototype.return = function (arg) { return this._invoke("return", arg); };

  function wrapAsyncGenerator(fn) {
    return function () {
      return new AsyncGenerator(fn.apply(this, arguments));
    };
  }

  function asyncGeneratorDelegate(inner) {
    var iter = {};
    var waiting = false;
    function pump(key, value) {
      waiting = true;
      value = new Promise(function (resolve) { resolve(inner[key](value)); });
      return { done: false, value: new OverloadYield(value, 1) };
    }
    iter[iteratorSymbol] = function () { return this; };
    iter.next = function (value) {
      if (waiting) {
        waiting = false;
        return value;
      }
      return pump("next", value);
    };
    if (typeof inner.throw === "function") {
      iter.throw = function (value) {
        if (waiting) {
          waiting = false;
          throw value;
        }
        return pump("throw", value);
      };
    }
    if (typeof inner.return === "function") {
      iter.return = function (value) {
        if (waiting) {
          waiting = false;
          return value;
        }
        return pump("return", value);
      };
    }
    return iter;
  }

  function AsyncFromSyncIterator(iterator) {
    this.s = iterator;
    this.n = iterator.next;
  }

  function asyncFromSyncStep(result) {
    if (Object(result) !== result) {
      return Promise.reject(new TypeError(result + " is not an object."));
    }
    var done = result.done;
    return Promise.resolve(result.value).then(function (value) {
      return { value: value, done: done };
    });
  }

  AsyncFromSyncIterator.prototype.next = function () {
    return asyncFromSyncStep(this.n.apply(this.s, arguments));
  };
  AsyncFromSyncIterator.prototype.return = function (value) {
    var ret = this.s.return;
    if (ret === undefined) {
      return Promise.resolve({ value: value, done: true });
    }
    return asyncFromSyncStep(ret.apply(this.s, arguments));
  };
  AsyncFromSyncIterator.prototype.throw = function (value) {
    var thr = this.s.throw;
    if (thr === undefined) {
      return Promise.reject(value);
    }
    return asyncFromSyncStep(thr.apply(this.s, arguments));
  };

  function asyncIterator(iterable) {
    var method;
    if (typeof Symbol === "function") {
      if (Symbol.asyncIterator && (method = iterable[Symbol.asyncIterator]) != null) {
        return method.call(iterable);
      }
      if (Symbol.iterator && (method = iterable[Symbol.iterator]) != null) {
        return new AsyncFromSyncIterator(method.call(iterable));
      }
    }
    throw new TypeError("Object is not async iterable");
  }

  function checkPrivateRedeclaration(object, store) {
    if (store.has(object)) {
      throw new TypeError("Cannot initialize the same private elements twice on an object");
    }
  }

  function classPrivateFieldInitSpec(object, store, value) {
    checkPrivateRedeclaration(object, store);
    store.set(object, value);
  }

  function classPrivateMethodInitSpec(object, brand) {
    checkPrivateRedeclaration(object, brand);
    brand.add(object);
  }

  function assertClassBrand(brand, receiver, value) {
    if (typeof brand === "function" ? brand === receiver : brand.has(receiver)) {
      return arguments.length < 3 ? receiver : value;
    }
    throw new TypeError("Private element is not present on this object");
  }

  function classPrivateFieldGet2(store, receiver) {
    return store.get(assertClassBrand(store, receiver));
  }

  function classPrivateFieldSet2(store, receiver, value) {
    store.set(assertClassBrand(store, receiver), value);
    return value;
  }

  function toSetter(fn, args, self) {
    args = args || [];
    var index = args.length++;
    return Object.defineProperty({}, "_", {
      set: function (value) {
        args[index] = value;
        fn.apply(self, args);
      }
    });
  }

  // Flag 1: the target is a class and the prototype is used.
  // Flag 2: the result is a method to be called with `receiver`.
  function superPropGet(target, key, receiver, flags) {
    var value = Reflect.get(Object.getPrototypeOf(flags & 1 ? target.prototype : target), key, receiver);
    return flags & 2 && typeof value === "function"
      ? function (args) { return value.apply(receiver, args); }
      : value;
  }

  function superPropSet(target, key, value, receiver, strict, prototype) {
    var ok = Reflect.set(Object.getPrototypeOf(prototype ? target.prototype : target), key, value, receiver);
    if (!ok && strict) {
      throw new TypeError("failed to set property");
    }
    return value;
  }

  function readOnlyError(name) {
    throw new TypeError('"' + name + '" is read-only');
  }

  function writeOnlyError(name) {
    throw new TypeError('"' + name + '" is write-only');
  }

  function checkInRHS(value) {
    if (Object(value) !== value) {
      throw new TypeError("right-hand side of 'in' should be an object, got " + (value !== null ? typeof value : "null"));
    }
    return value;
  }

  root.babelHelpers = {
    toPrimitive: toPrimitive,
    toPropertyKey: toPropertyKey,
    defineProperty: defineProperty,
    objectSpread2: objectSpread2,
    extends: Object.assign,
    objectWithoutProperties: objectWithoutProperties,
    objectDestructuringEmpty: objectDestructuringEmpty,
    asyncToGenerator: asyncToGenerator,
    awaitAsyncGenerator: awaitAsyncGenerator,
    wrapAsyncGenerator: wrapAsyncGenerator,
    asyncGeneratorDelegate: asyncGeneratorDelegate,
    asyncIterator: asyncIterator,
    classPrivateFieldInitSpec: classPrivateFieldInitSpec,
    classPrivateMethodInitSpec: classPrivateMethodInitSpec,
    classPrivateFieldGet2: classPrivateFieldGet2,
    classPrivateFieldSet2: classPrivateFieldSet2,
    assertClassBrand: assertClassBrand,
    toSetter: toSetter,
    superPropGet: superPropGet,
    superPropSet: superPropSet,
    readOnlyError: readOnlyError,
    writeOnlyError: writeOnlyError,
    checkInRHS: checkInRHS
  };
})(typeof globalThis !== "undefined" ? globalThis : typeof self !== "undefined" ? self : this);
"#;

/// `module.hot` and update application.
const HOT_RUNTIME: &str = r#"
  __sheetpack_require__.hot = function (id, data) {
    return {
      data: data,
      accepted: false,
      disposers: [],
      accept: function (callback) {
        this.accepted = true;
        this.onAccept = callback;
      },
      dispose: function (callback) {
        this.disposers.push(callback);
      }
    };
  };

  // Swap in new factories. Returns false when a loaded module cannot take
  // the update in place and the page must reload.
  __sheetpack_require__.apply = function (updates) {
    var ids = Object.keys(updates);
    var blocked = ids.filter(function (id) {
      var module = cache[id];
      return module !== undefined && !module.hot.accepted;
    });
    if (blocked.length > 0) {
      return false;
    }

    var rerun = [];
    ids.forEach(function (id) {
      var module = cache[id];
      modules[id] = updates[id];
      if (module === undefined) {
        return;
      }
      var data = {};
      module.hot.disposers.forEach(function (dispose) { dispose(data); });
      hotData[id] = data;
      delete cache[id];
      rerun.push(module);
    });

    rerun.forEach(function (old) {
      __sheetpack_require__(old.id);
      if (typeof old.hot.onAccept === "function") {
        old.hot.onAccept();
      }
    });
    return true;
  };
"#;

/// Websocket client applying updates pushed by the development server.
const HOT_CLIENT: &str = r#"
  (function () {
    if (typeof WebSocket === "undefined") {
      return;
    }
    var overlay = null;

    function hideOverlay() {
      if (overlay !== null) {
        overlay.parentNode.removeChild(overlay);
        overlay = null;
      }
    }

    function showOverlay(message) {
      hideOverlay();
      overlay = document.createElement("div");
      overlay.setAttribute("style", "position:fixed;inset:0;z-index:2147483647;overflow:auto;padding:24px;background:rgba(0,0,0,0.85);color:#ff6b6b;font:13px/1.5 monospace;white-space:pre-wrap;");
      overlay.textContent = message;
      document.body.appendChild(overlay);
    }

    function swapStylesheet(href) {
      var links = document.querySelectorAll('link[rel="stylesheet"]');
      for (var i = 0; i < links.length; i++) {
        var url = new URL(links[i].href, location.href);
        if (url.pathname === href) {
          var next = links[i].cloneNode();
          next.href = href + "?t=" + Date.now();
          next.onload = (function (prev) {
            return function () { prev.parentNode && prev.parentNode.removeChild(prev); };
          })(links[i]);
          links[i].parentNode.insertBefore(next, links[i].nextSibling);
          return;
        }
      }
      location.reload();
    }

    var protocol = location.protocol === "https:" ? "wss://" : "ws://";
    var socket = new WebSocket(protocol + location.host + "/__hmr");

    socket.onmessage = function (event) {
      var message = JSON.parse(event.data);
      switch (message.type) {
        case "connected":
          console.log("[hmr] connected");
          break;
        case "update":
          hideOverlay();
          var factories = {};
          Object.keys(message.modules).forEach(function (id) {
            factories[id] = new Function("module", "exports", "__sheetpack_require__", message.modules[id]);
          });
          if (!__sheetpack_require__.apply(factories)) {
            location.reload();
          } else if (Object.keys(factories).length > 0) {
            console.log("[hmr] updated " + Object.keys(factories).join(", "));
          }
          break;
        case "css_update":
          hideOverlay();
          swapStylesheet(message.href);
          break;
        case "error":
          console.error(message.message);
          showOverlay(message.message);
          break;
        case "reload":
          location.reload();
          break;
      }
    };

    socket.onclose = function () {
      console.log("[hmr] disconnected");
    };
  })();
"#;

/// A module as it appears in the script bundle.
#[derive(Debug, Clone)]
pub struct BundleModule<'a> {
    pub id: &'a str,
    pub body: &'a str,
    pub map: Option<&'a str>,
}

/// Rendered script bundle.
#[derive(Debug, Clone)]
pub struct ScriptBundle {
    pub code: String,
    pub map: Option<String>,
}

/// Render the script bundle. Modules appear in the order given, which the
/// caller keeps sorted by id.
pub fn render_script(
    modules: &[BundleModule<'_>],
    entries: &[String],
    hot: bool,
    source_map_name: Option<&str>,
) -> ScriptBundle {
    let mut code = String::new();
    // Hot updates may start using a helper later, so hot bundles always
    // carry them.
    if hot || modules.iter().any(|m| uses_helpers(m.body)) {
        code.push_str(HELPERS);
    }
    code.push_str(PRELUDE);
    if hot {
        code.push_str(HOT_RUNTIME);
        code.push_str(HOT_CLIENT);
    }
    code.push_str("\n  entries.forEach(function (id) { __sheetpack_require__(id); });\n})({\n");

    let mut map = source_map_name.map(|_| IndexMap::new());
    let mut line = code.matches('\n').count() as u32;

    for module in modules {
        let wrapper = format!(
            "{}: function (module, exports, {}) {{ ",
            quote(module.id),
            REQUIRE
        );
        code.push_str(&wrapper);

        if let (Some(index), Some(module_map)) = (map.as_mut(), module.map) {
            // The module's own code starts on the line after its header.
            index.push_section(line + 1, module.id, module_map);
        }

        code.push_str(module.body);
        code.push_str("\n},\n");
        line += module.body.matches('\n').count() as u32 + 2;
    }

    let entry_ids = entries.iter().map(|e| quote(e)).collect::<Vec<_>>().join(", ");
    code.push_str(&format!("}}, [{}]);\n", entry_ids));

    let map = match (map, source_map_name) {
        (Some(index), Some(name)) => {
            let file = name.trim_end_matches(".map");
            code.push_str(&format!("//# sourceMappingURL={}\n", name));
            Some(index.to_json(file))
        }
        _ => None,
    };

    ScriptBundle { code, map }
}

fn uses_helpers(body: &str) -> bool {
    body.contains(&format!("{}.", HELPERS_GLOBAL))
}

/// Minimal page served while the first build is failing. It listens for the
/// next update and reloads.
pub fn error_page(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Build failed</title></head>
<body style="margin:0;padding:24px;background:#1e1e1e;color:#ff6b6b;font:13px/1.5 monospace;">
<pre style="white-space:pre-wrap;">{}</pre>
<script>
(function () {{
  var protocol = location.protocol === "https:" ? "wss://" : "ws://";
  var socket = new WebSocket(protocol + location.host + "/__hmr");
  socket.onmessage = function (event) {{
    var message = JSON.parse(event.data);
    if (message.type === "update" || message.type === "reload") {{
      location.reload();
    }}
  }};
}})();
</script>
</body>
</html>
"#,
        escaped
    )
}

/// Bodies keyed by module id, as sent in hot updates.
pub type ModuleBodies = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn modules() -> Vec<BundleModule<'static>> {
        vec![
            BundleModule {
                id: "./src/a.js",
                body: "\nmodule.exports = 1;\n",
                map: Some(r#"{"version":3,"sources":["a.js"],"names":[],"mappings":"AAAA"}"#),
            },
            BundleModule {
                id: "./src/b.js",
                body: "\nmodule.exports = 2;",
                map: None,
            },
        ]
    }

    #[test]
    fn renders_modules_and_entries() {
        let bundle = render_script(&modules(), &["./src/a.js".to_string()], false, None);

        assert!(bundle.code.starts_with("(function (modules, entries) {"));
        assert!(bundle
            .code
            .contains("\"./src/a.js\": function (module, exports, __sheetpack_require__) { \nmodule.exports = 1;\n\n},"));
        assert!(bundle.code.ends_with("}, [\"./src/a.js\"]);\n"));
        assert!(!bundle.code.contains("__sheetpack_require__.apply"));
        assert!(bundle.map.is_none());
        assert!(!bundle.code.contains("sourceMappingURL"));
    }

    #[test]
    fn helpers_are_included_only_when_referenced() {
        let plain = render_script(&modules(), &[], false, None);
        assert!(!plain.code.contains("root.babelHelpers"));

        let lowered = [BundleModule {
            id: "./src/store.js",
            body: "\nmodule.exports = babelHelpers.objectSpread2({}, state);",
            map: None,
        }];
        let bundle = render_script(&lowered, &[], false, None);

        assert!(bundle.code.starts_with("(function (root) {"));
        assert!(bundle.code.contains("objectSpread2: objectSpread2"));
        assert!(bundle.code.contains("asyncToGenerator: asyncToGenerator"));

        let hot = render_script(&modules(), &[], true, None);
        assert!(hot.code.contains("root.babelHelpers = {"));
    }

    #[test]
    fn hot_bundles_carry_the_client() {
        let bundle = render_script(&modules(), &[], true, None);

        assert!(bundle.code.contains("__sheetpack_require__.apply"));
        assert!(bundle.code.contains("/__hmr"));
    }

    #[test]
    fn source_map_sections_point_at_module_code() {
        let bundle = render_script(&modules(), &[], false, Some("bundle.js.map"));

        assert!(bundle.code.ends_with("//# sourceMappingURL=bundle.js.map\n"));

        let map: serde_json::Value = serde_json::from_str(&bundle.map.unwrap()).unwrap();
        let sections = map["sections"].as_array().unwrap();
        assert_eq!(sections.len(), 1);

        let line = sections[0]["offset"]["line"].as_u64().unwrap() as usize;
        let code_line = bundle.code.lines().nth(line).unwrap();
        assert_eq!(code_line, "module.exports = 1;");
    }

    #[test]
    fn error_page_escapes_markup() {
        let page = error_page("Unexpected token <div>");

        assert!(page.contains("Unexpected token &lt;div&gt;"));
        assert!(page.contains("/__hmr"));
    }
}
